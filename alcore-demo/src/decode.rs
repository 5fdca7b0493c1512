use anyhow::{Context, Result, anyhow};
use std::fs::File;
use std::path::Path;
use symphonia::{
    core::{
        audio::SampleBuffer, codecs::DecoderOptions, errors::Error, formats::FormatOptions,
        io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
    },
    default::{get_codecs, get_probe},
};

/// Interleaved f32 PCM decoded from a file.
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Mono sources are positioned; anything wider is averaged down.
    pub fn into_mono(self) -> Self {
        if self.channels == 1 {
            return self;
        }
        let channels = self.channels as usize;
        let samples = self
            .samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        Self {
            samples,
            channels: 1,
            sample_rate: self.sample_rate,
        }
    }

    /// Little-endian bytes for a float buffer upload
    pub fn to_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// One second of a sine tone, for running without a file.
    pub fn tone(frequency: f32, sample_rate: u32) -> Self {
        let samples = (0..sample_rate)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                0.4 * (2.0 * std::f32::consts::PI * frequency * t).sin()
            })
            .collect();
        Self {
            samples,
            channels: 1,
            sample_rate,
        }
    }
}

/// Decodes the default track of an audio file with symphonia.
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| anyhow!("Failed to probe audio format: {:?}", e))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("No default audio track found"))?;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("Sample rate not found"))?;
    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| anyhow!("Channel count not found"))?
        .count() as u16;

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| anyhow!("Failed to create decoder: {:?}", e))?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // end-of-file
            Err(Error::IoError(_)) => break,
            Err(e) => return Err(anyhow!("Error reading packet: {:?}", e)),
        };

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(Error::IoError(_)) => break,
            Err(Error::DecodeError(_)) => continue,
            Err(e) => return Err(anyhow!("Error decoding packet: {:?}", e)),
        };

        let spec = *decoded.spec();
        let mut tmp = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        tmp.copy_interleaved_ref(decoded);
        samples.extend_from_slice(tmp.samples());
    }

    log::info!(
        "Decoded {}: {} frames, {} channels at {} Hz",
        path.display(),
        samples.len() / channels.max(1) as usize,
        channels,
        sample_rate
    );

    Ok(DecodedAudio {
        samples,
        channels,
        sample_rate,
    })
}
