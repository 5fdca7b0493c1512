//! Error types for alcore

use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlError {
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),
}

impl AlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OutOfMemory(_) => ErrorKind::OutOfMemory,
            Self::InvalidName(_) => ErrorKind::InvalidName,
            Self::InvalidOperation(_) => ErrorKind::InvalidOperation,
            Self::InvalidValue(_) => ErrorKind::InvalidValue,
            Self::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
        }
    }
}

pub type Result<T> = std::result::Result<T, AlError>;

/// Abstract error kind as seen through a sticky error register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ErrorKind {
    #[default]
    NoError = 0,
    InvalidName = 1,
    InvalidOperation = 2,
    InvalidValue = 3,
    OutOfMemory = 4,
    DeviceUnavailable = 5,
}

impl ErrorKind {
    /// Numeric code reported by the application entry points.
    pub fn code(self) -> u32 {
        match self {
            Self::NoError => 0,
            Self::InvalidName | Self::DeviceUnavailable => 0xA001,
            Self::InvalidValue => 0xA003,
            Self::InvalidOperation => 0xA004,
            Self::OutOfMemory => 0xA005,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::InvalidName,
            2 => Self::InvalidOperation,
            3 => Self::InvalidValue,
            4 => Self::OutOfMemory,
            5 => Self::DeviceUnavailable,
            _ => Self::NoError,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NoError => "no error",
            Self::InvalidName => "invalid name",
            Self::InvalidOperation => "invalid operation",
            Self::InvalidValue => "invalid value",
            Self::OutOfMemory => "out of memory",
            Self::DeviceUnavailable => "device unavailable",
        };
        f.write_str(name)
    }
}

/// One-slot, first-error-wins error holder.
///
/// Later errors are dropped until the register is read with [`ErrorRegister::take`].
#[derive(Debug, Default)]
pub struct ErrorRegister {
    slot: AtomicU8,
}

impl ErrorRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `kind` if the register is empty. Returns true if it was stored.
    pub fn record(&self, kind: ErrorKind) -> bool {
        if kind == ErrorKind::NoError {
            return false;
        }
        self.slot
            .compare_exchange(
                ErrorKind::NoError as u8,
                kind as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Returns the pending error and clears the register.
    pub fn take(&self) -> ErrorKind {
        ErrorKind::from_u8(self.slot.swap(ErrorKind::NoError as u8, Ordering::AcqRel))
    }
}
