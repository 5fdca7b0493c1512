use crate::error::{AlError, Result};
use rubato::{FftFixedIn, Resampler};

/// Offline resampler for whole buffer uploads.
pub struct BatchResampler {
    source_frequency: u32,
    target_frequency: u32,
    channels: u16,
    chunk_size: usize,
}

impl BatchResampler {
    /// # Arguments
    /// * `source_frequency` - Frequency of the uploaded data
    /// * `target_frequency` - Output frequency of the mixer
    /// * `channels` - Channels in the interleaved data
    /// * `chunk_size` - Frames per processing chunk (defaults to 1024)
    pub fn new(
        source_frequency: u32,
        target_frequency: u32,
        channels: u16,
        chunk_size: Option<usize>,
    ) -> Result<Self> {
        if source_frequency == 0 || target_frequency == 0 {
            return Err(AlError::InvalidValue(
                "Frequencies must be greater than 0".to_string(),
            ));
        }
        if channels == 0 {
            return Err(AlError::InvalidValue(
                "Channel count must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            source_frequency,
            target_frequency,
            channels,
            chunk_size: chunk_size.unwrap_or(1024),
        })
    }

    /// Frames the resampled output of `frames` input frames should hold
    pub fn output_frames(&self, frames: usize) -> usize {
        (frames as u64 * self.target_frequency as u64).div_ceil(self.source_frequency as u64) as usize
    }

    /// Resamples interleaved data, keeping it interleaved.
    ///
    /// All channels go through one resampler in planar form. Input is fed in
    /// zero-padded chunks until the resampler's delay has been flushed, and the
    /// result is the [`output_frames`](Self::output_frames) frames that follow it.
    pub fn resample_interleaved(&self, interleaved: &[f32]) -> Result<Vec<f32>> {
        if self.source_frequency == self.target_frequency {
            return Ok(interleaved.to_vec());
        }

        let channels = self.channels as usize;
        let frames = interleaved.len() / channels;
        if frames == 0 {
            return Ok(Vec::new());
        }
        let planar: Vec<Vec<f32>> = (0..channels)
            .map(|ch| interleaved.iter().skip(ch).step_by(channels).copied().collect())
            .collect();

        let mut resampler = FftFixedIn::<f32>::new(
            self.source_frequency as usize,
            self.target_frequency as usize,
            self.chunk_size,
            2,
            channels,
        )
        .map_err(|e| AlError::InvalidValue(format!("Failed to create resampler: {}", e)))?;

        let delay = resampler.output_delay();
        let expected = self.output_frames(frames);
        let mut output: Vec<Vec<f32>> = vec![Vec::new(); channels];
        let mut start = 0;
        while output[0].len() < delay + expected {
            let end = (start + self.chunk_size).min(frames);
            let chunk: Vec<Vec<f32>> = planar
                .iter()
                .map(|channel| {
                    let mut padded = vec![0.0f32; self.chunk_size];
                    if start < end {
                        padded[..end - start].copy_from_slice(&channel[start..end]);
                    }
                    padded
                })
                .collect();

            let resampled = resampler
                .process(&chunk, None)
                .map_err(|e| AlError::InvalidValue(format!("Resampling error: {}", e)))?;
            for (out, channel) in output.iter_mut().zip(resampled) {
                out.extend_from_slice(&channel);
            }
            start = end;
        }

        let mut result = Vec::with_capacity(expected * channels);
        for frame in delay..delay + expected {
            for channel in &output {
                result.push(channel[frame]);
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_passthrough() {
        let resampler = BatchResampler::new(48000, 48000, 2, None).unwrap();
        let data = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(resampler.resample_interleaved(&data).unwrap(), data);
    }

    #[test]
    fn test_upsampling_length_and_layout() {
        let resampler = BatchResampler::new(24000, 48000, 2, Some(256)).unwrap();

        // Left channel silent, right channel constant
        let frames = 1000;
        let data: Vec<f32> = (0..frames).flat_map(|_| [0.0, 0.5]).collect();
        let out = resampler.resample_interleaved(&data).unwrap();

        assert_eq!(out.len(), resampler.output_frames(frames) * 2);
        assert!(out.iter().step_by(2).all(|s| s.abs() < 1e-3));
        assert!(out.iter().skip(1).step_by(2).any(|s| *s > 0.4));
    }

    fn mean(samples: &[f32]) -> f32 {
        samples.iter().sum::<f32>() / samples.len() as f32
    }

    #[test]
    fn test_short_upload_keeps_its_content() {
        // Far shorter than one chunk, so the output is mostly flushed delay
        let resampler = BatchResampler::new(24000, 48000, 1, None).unwrap();
        let out = resampler.resample_interleaved(&[0.5; 100]).unwrap();

        assert_eq!(out.len(), 200);
        assert!(out.iter().any(|s| *s > 0.4));
        assert!((mean(&out[40..160]) - 0.5).abs() < 0.05);
    }

    #[test]
    fn test_content_is_aligned_with_input() {
        let resampler = BatchResampler::new(44100, 48000, 1, None).unwrap();
        let mut data = vec![0.5; 441];
        data.extend(std::iter::repeat_n(0.0, 441));
        let out = resampler.resample_interleaved(&data).unwrap();

        assert_eq!(out.len(), 960);
        // Step from 0.5 to silence lands at 480
        assert!((mean(&out[100..380]) - 0.5).abs() < 0.05);
        assert!(mean(&out[580..860]).abs() < 0.05);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(BatchResampler::new(0, 48000, 1, None).is_err());
        assert!(BatchResampler::new(44100, 48000, 0, None).is_err());
    }
}
