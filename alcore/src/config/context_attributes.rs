use crate::error::{AlError, Result};
use std::time::Duration;

/// Attribute keys recognised in a context creation request.
pub mod attribute {
    /// Requested output frequency in Hz
    pub const FREQUENCY: i32 = 0x1007;
    /// Requested update rate of an asynchronous context in Hz
    pub const REFRESH: i32 = 0x1008;
    /// Non-zero requests a synchronous context (processed only on demand)
    pub const SYNC: i32 = 0x1009;
}

/// Parsed context configuration request.
///
/// Everything is a hint to the backend. Pairs with unknown keys are kept in
/// `extra`, in request order, so backends can read their own hints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextAttributes {
    pub frequency: Option<u32>,
    pub refresh: Option<u32>,
    pub synchronous: bool,
    pub extra: Vec<(i32, i32)>,
}

impl ContextAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an ordered list of attribute/value pairs. A zero key ends the list.
    pub fn from_pairs(pairs: &[(i32, i32)]) -> Result<Self> {
        let mut attributes = Self::default();

        for &(key, value) in pairs {
            match key {
                0 => break,
                attribute::FREQUENCY => {
                    attributes.frequency = Some(positive(key, value)?);
                }
                attribute::REFRESH => {
                    attributes.refresh = Some(positive(key, value)?);
                }
                attribute::SYNC => {
                    attributes.synchronous = value != 0;
                }
                _ => {
                    log::debug!("Passing through unrecognised context attribute {:#x}", key);
                    attributes.extra.push((key, value));
                }
            }
        }

        Ok(attributes)
    }

    /// Parses a flat, zero-terminated `key, value, key, value, ..., 0` list.
    pub fn from_list(list: &[i32]) -> Result<Self> {
        let pairs: Vec<(i32, i32)> = list
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect();
        Self::from_pairs(&pairs)
    }

    pub fn with_frequency(mut self, frequency: u32) -> Self {
        self.frequency = Some(frequency);
        self
    }

    pub fn with_refresh(mut self, refresh: u32) -> Self {
        self.refresh = Some(refresh);
        self
    }

    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    /// Processing period implied by the REFRESH attribute, if any
    pub fn update_interval(&self) -> Option<Duration> {
        self.refresh
            .filter(|hz| *hz > 0)
            .map(|hz| Duration::from_secs_f64(1.0 / hz as f64))
    }
}

fn positive(key: i32, value: i32) -> Result<u32> {
    if value <= 0 {
        return Err(AlError::InvalidValue(format!(
            "Attribute {:#x} must be positive, got {}",
            key, value
        )));
    }
    Ok(value as u32)
}
