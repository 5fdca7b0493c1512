//! Sample formats accepted by buffer uploads.

use crate::error::{AlError, Result};

/// Layout of the raw bytes handed to a buffer upload.
///
/// 8-bit samples are unsigned, 16-bit samples are signed little-endian and
/// float samples are little-endian IEEE 754. Multi-channel data is interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferFormat {
    Mono8,
    Mono16,
    Stereo8,
    Stereo16,
    MonoFloat32,
    StereoFloat32,
}

impl BufferFormat {
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0x1100 => Ok(Self::Mono8),
            0x1101 => Ok(Self::Mono16),
            0x1102 => Ok(Self::Stereo8),
            0x1103 => Ok(Self::Stereo16),
            0x10010 => Ok(Self::MonoFloat32),
            0x10011 => Ok(Self::StereoFloat32),
            _ => Err(AlError::InvalidValue(format!(
                "Unsupported buffer format {:#x}",
                code
            ))),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Mono8 => 0x1100,
            Self::Mono16 => 0x1101,
            Self::Stereo8 => 0x1102,
            Self::Stereo16 => 0x1103,
            Self::MonoFloat32 => 0x10010,
            Self::StereoFloat32 => 0x10011,
        }
    }

    pub fn channels(self) -> u16 {
        match self {
            Self::Mono8 | Self::Mono16 | Self::MonoFloat32 => 1,
            Self::Stereo8 | Self::Stereo16 | Self::StereoFloat32 => 2,
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            Self::Mono8 | Self::Stereo8 => 8,
            Self::Mono16 | Self::Stereo16 => 16,
            Self::MonoFloat32 | Self::StereoFloat32 => 32,
        }
    }

    /// Bytes in one frame (one sample per channel)
    pub fn frame_size(self) -> usize {
        self.channels() as usize * (self.bits() as usize / 8)
    }

    pub fn frames(self, byte_len: usize) -> usize {
        byte_len / self.frame_size()
    }

    /// Checks that `data` holds a non-empty whole number of frames.
    pub fn validate(self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(AlError::InvalidValue("Buffer data is empty".into()));
        }
        if data.len() % self.frame_size() != 0 {
            return Err(AlError::InvalidValue(format!(
                "{} bytes is not a whole number of {:?} frames",
                data.len(),
                self
            )));
        }
        Ok(())
    }

    /// Decodes raw bytes into interleaved f32 samples in [-1.0, 1.0].
    pub fn to_f32(self, data: &[u8]) -> Vec<f32> {
        match self.bits() {
            8 => data
                .iter()
                .map(|&byte| (byte as f32 - 128.0) / 128.0)
                .collect(),
            16 => data
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
                .collect(),
            _ => data
                .chunks_exact(4)
                .map(|quad| f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]))
                .collect(),
        }
    }
}
