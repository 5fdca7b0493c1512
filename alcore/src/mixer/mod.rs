//! Software mixing backend.
//!
//! Renders every playing voice into fixed-size blocks on `upkeep` and hands
//! them to an [`OutputTarget`]. Buffer data is decoded to f32 (and resampled
//! to the output frequency) when uploaded; committed buffers are swapped in
//! atomically so re-uploads never disturb what is playing.

mod output;
mod resampler;
mod voice;

#[cfg(feature = "system-output")]
pub use output::CpalDriver;
pub use output::{NullDriver, NullMeter, OutputDriver, OutputTarget};
pub use resampler::BatchResampler;
pub use voice::{MixParams, SampleData, Voice};

use crate::backend::{
    Backend, BackendDevice, BufferImpl, BufferSnapshot, ContextImpl, ContextSnapshot, SourceImpl,
    SourceSnapshot,
};
use crate::config::ContextAttributes;
use crate::error::{AlError, Result};
use crate::format::BufferFormat;
use crate::state::ListenerState;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Shape of the software mixer's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixerDesc {
    /// Output frequency used when a context does not request one
    pub frequency: u32,
    pub channels: u16,
    /// Frames rendered per block
    pub block_size: usize,
    /// Blocks the output may buffer ahead
    pub ring_blocks: usize,
    /// Voices (sources) the mixer can hold at once
    pub max_voices: usize,
}

impl Default for MixerDesc {
    fn default() -> Self {
        Self {
            frequency: 48000,
            channels: 2,
            block_size: 1024,
            ring_blocks: 4,
            max_voices: 256,
        }
    }
}

impl MixerDesc {
    pub fn ring_frames(&self) -> usize {
        self.block_size * self.ring_blocks.max(1)
    }
}

/// Backend kind that mixes in software over an [`OutputDriver`].
pub struct SoftwareMixer {
    name: String,
    driver: Box<dyn OutputDriver>,
    desc: MixerDesc,
}

impl SoftwareMixer {
    pub fn new(driver: impl OutputDriver + 'static, desc: MixerDesc) -> Self {
        Self {
            name: format!("{} Mixer", driver.name()),
            driver: Box::new(driver),
            desc,
        }
    }
}

impl Backend for SoftwareMixer {
    fn name(&self) -> &str {
        &self.name
    }

    fn enumerate(&self, report: &mut dyn FnMut(&str)) {
        self.driver.enumerate(report);
    }

    fn open(&self, device_name: Option<&str>) -> Option<Box<dyn BackendDevice>> {
        let target = self.driver.open(device_name, &self.desc)?;
        Some(Box::new(MixerDevice::new(target, self.desc.clone())))
    }
}

#[derive(Debug, Default)]
struct BufferSlot {
    /// What voices play
    active: Option<Arc<SampleData>>,
    /// Last upload, published by the next commit
    staged: Option<Arc<SampleData>>,
}

#[derive(Default)]
struct MixState {
    contexts: HashMap<u64, ListenerState>,
    voices: HashMap<u64, Voice>,
    buffers: HashMap<u64, BufferSlot>,
}

/// Objects freed since the state was last locked.
#[derive(Default)]
struct Retired {
    contexts: Vec<u64>,
    voices: Vec<u64>,
    buffers: Vec<u64>,
}

/// One opened software mixer.
///
/// Lock order is `output`, `state`, `retired`. Allocation and freeing never
/// touch `state`: objects enter it on their first commit or upload and leave
/// it through `retired` the next time it is locked, so callers holding their
/// own locks never wait on a render.
struct MixerDevice {
    desc: MixerDesc,
    output: Mutex<Box<dyn OutputTarget>>,
    /// Running output frequency, 0 until the first context is configured
    frequency: AtomicU32,
    state: Mutex<MixState>,
    retired: Mutex<Retired>,
    voices: AtomicUsize,
    next_id: AtomicU64,
}

impl MixerDevice {
    fn new(target: Box<dyn OutputTarget>, desc: MixerDesc) -> Self {
        Self {
            desc,
            output: Mutex::new(target),
            frequency: AtomicU32::new(0),
            state: Mutex::new(MixState::default()),
            retired: Mutex::new(Retired::default()),
            voices: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Locks the mixing state after dropping everything retired since.
    fn lock_state(&self) -> MutexGuard<'_, MixState> {
        let mut state = self.state.lock();
        let retired = std::mem::take(&mut *self.retired.lock());
        for context in retired.contexts {
            state.contexts.remove(&context);
            state.voices.retain(|_, voice| voice.context() != context);
        }
        for voice in retired.voices {
            state.voices.remove(&voice);
        }
        for buffer in retired.buffers {
            state.buffers.remove(&buffer);
        }
        state
    }

    fn output_frequency(&self) -> u32 {
        match self.frequency.load(Ordering::Acquire) {
            0 => self.desc.frequency,
            frequency => frequency,
        }
    }

    /// Mixes one block of `frames` frames, clamped to [-1.0, 1.0].
    fn render(&self, frames: usize, frequency: u32) -> Vec<f32> {
        let channels = self.desc.channels.max(1) as usize;
        let mut mix = vec![0.0f32; frames * channels];

        let mut state = self.lock_state();
        let MixState {
            contexts,
            voices,
            buffers,
        } = &mut *state;

        for voice in voices.values_mut().filter(|voice| voice.is_playing()) {
            let Some(listener) = contexts.get(&voice.context()) else {
                continue;
            };
            let params = MixParams::spatialize(voice.state(), listener, channels as u16);
            voice.render(&mut mix, channels, &params, frequency, |id: u64| {
                buffers.get(&id).and_then(|slot| slot.active.clone())
            });
        }
        drop(state);

        for sample in mix.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        mix
    }
}

impl BackendDevice for MixerDevice {
    fn configure(&self, attributes: &ContextAttributes) -> Result<()> {
        let mut output = self.output.lock();
        if output.is_running() {
            let running = self.frequency.load(Ordering::Acquire);
            return match attributes.frequency {
                Some(requested) if requested != running => Err(AlError::InvalidOperation(format!(
                    "Output already running at {} Hz, cannot switch to {} Hz",
                    running, requested
                ))),
                _ => Ok(()),
            };
        }

        let frequency = attributes.frequency.unwrap_or(self.desc.frequency);
        output.start(frequency, self.desc.channels)?;
        self.frequency.store(frequency, Ordering::Release);
        log::info!(
            "Mixer configured: {} Hz, {} channels, {} frame blocks",
            frequency,
            self.desc.channels,
            self.desc.block_size
        );
        Ok(())
    }

    fn close(&self) {
        self.output.lock().stop();
        let mut state = self.lock_state();
        state.voices.clear();
        state.buffers.clear();
        state.contexts.clear();
        self.voices.store(0, Ordering::Release);
        log::info!("Mixer closed");
    }

    fn allocate_context(&self) -> Option<ContextImpl> {
        Some(ContextImpl::new(self.next_id()))
    }

    fn free_context(&self, context: ContextImpl) {
        self.retired.lock().contexts.push(context.raw());
    }

    fn allocate_source(&self, _context: &ContextImpl) -> Option<SourceImpl> {
        let limit = self.desc.max_voices;
        let reserved = self
            .voices
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            });
        if reserved.is_err() {
            log::warn!("Mixer voice limit ({}) reached", limit);
            return None;
        }
        Some(SourceImpl::new(self.next_id()))
    }

    fn free_source(&self, source: SourceImpl) {
        self.retired.lock().voices.push(source.raw());
        let _ = self
            .voices
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn allocate_buffer(&self) -> Option<BufferImpl> {
        Some(BufferImpl::new(self.next_id()))
    }

    fn free_buffer(&self, buffer: BufferImpl) {
        self.retired.lock().buffers.push(buffer.raw());
    }

    fn upload_buffer(
        &self,
        buffer: &BufferImpl,
        format: BufferFormat,
        data: &[u8],
        frequency: u32,
    ) -> Result<()> {
        let channels = format.channels();
        let target = self.output_frequency();

        let samples = format.to_f32(data);
        let (samples, rate) = if frequency == target {
            (samples, frequency)
        } else {
            let resampler = BatchResampler::new(frequency, target, channels, None)?;
            (resampler.resample_interleaved(&samples)?, target)
        };
        let decoded = Arc::new(SampleData::new(samples, channels, rate));

        self.lock_state()
            .buffers
            .entry(buffer.raw())
            .or_default()
            .staged = Some(decoded);
        Ok(())
    }

    fn commit_source(&self, source: &SourceSnapshot<'_>) {
        let mut state = self.lock_state();
        let voice = state
            .voices
            .entry(source.source.raw())
            .or_insert_with(|| Voice::new(source.context.raw()));
        let queue = source.buffers.iter().map(|buffer| buffer.raw()).collect();
        voice.update(source.state.clone(), queue);
    }

    fn commit_buffer(&self, buffer: &BufferSnapshot<'_>) {
        let mut state = self.lock_state();
        if let Some(slot) = state.buffers.get_mut(&buffer.buffer.raw()) {
            if let Some(staged) = slot.staged.take() {
                slot.active = Some(staged);
            }
        }
    }

    fn commit_context(&self, context: &ContextSnapshot<'_>) {
        self.lock_state()
            .contexts
            .insert(context.context.raw(), context.listener.clone());
    }

    fn upkeep(&self) {
        let mut output = self.output.lock();
        if !output.is_running() {
            return;
        }
        let frequency = self.output_frequency();

        for _ in 0..self.desc.ring_blocks.max(1) {
            if output.writable_frames() < self.desc.block_size {
                break;
            }
            let block = self.render(self.desc.block_size, frequency);
            output.write(&block);
        }
    }
}
