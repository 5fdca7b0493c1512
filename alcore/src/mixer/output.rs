//! Where the mixer's rendered blocks go.

use super::MixerDesc;
use crate::error::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

/// A family of output endpoints the mixer can be opened on.
pub trait OutputDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Reports every endpoint name [`OutputDriver::open`] would accept.
    fn enumerate(&self, report: &mut dyn FnMut(&str));

    /// Claims an endpoint (`None` for the default one) without starting it.
    fn open(&self, name: Option<&str>, desc: &MixerDesc) -> Option<Box<dyn OutputTarget>>;
}

/// One opened endpoint accepting interleaved f32 blocks.
pub trait OutputTarget: Send {
    fn start(&mut self, frequency: u32, channels: u16) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Frames that can be written right now without blocking
    fn writable_frames(&self) -> usize;

    fn write(&mut self, block: &[f32]);

    fn stop(&mut self);
}

/// Counters shared by a [`NullDriver`] and every output it opens.
#[derive(Debug, Default)]
pub struct NullMeter {
    frames: AtomicU64,
    peak_bits: AtomicU32,
}

impl NullMeter {
    /// Frames written since the output was opened
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Largest absolute sample of the most recent block
    pub fn last_peak(&self) -> f32 {
        f32::from_bits(self.peak_bits.load(Ordering::Relaxed))
    }
}

/// Output that paces itself on the wall clock and discards what it is given.
pub struct NullDriver {
    claims_default: bool,
    meter: Arc<NullMeter>,
}

impl NullDriver {
    pub const DEVICE_NAME: &'static str = "Null Output";

    /// Only claims the name [`NullDriver::DEVICE_NAME`].
    pub fn new() -> Self {
        Self {
            claims_default: false,
            meter: Arc::new(NullMeter::default()),
        }
    }

    /// Also claims the default device.
    pub fn as_default(mut self) -> Self {
        self.claims_default = true;
        self
    }

    pub fn meter(&self) -> Arc<NullMeter> {
        self.meter.clone()
    }
}

impl Default for NullDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDriver for NullDriver {
    fn name(&self) -> &str {
        "Null"
    }

    fn enumerate(&self, report: &mut dyn FnMut(&str)) {
        report(Self::DEVICE_NAME);
    }

    fn open(&self, name: Option<&str>, desc: &MixerDesc) -> Option<Box<dyn OutputTarget>> {
        let claimed = match name {
            Some(name) => name == Self::DEVICE_NAME || name.eq_ignore_ascii_case("null"),
            None => self.claims_default,
        };
        claimed.then(|| {
            Box::new(NullOutput {
                capacity: desc.ring_frames(),
                frequency: 0,
                channels: desc.channels.max(1),
                started: None,
                written: 0,
                meter: self.meter.clone(),
            }) as Box<dyn OutputTarget>
        })
    }
}

struct NullOutput {
    /// Frames the output pretends to buffer ahead of the clock
    capacity: usize,
    frequency: u32,
    channels: u16,
    started: Option<Instant>,
    written: u64,
    meter: Arc<NullMeter>,
}

impl OutputTarget for NullOutput {
    fn start(&mut self, frequency: u32, channels: u16) -> Result<()> {
        self.frequency = frequency;
        self.channels = channels.max(1);
        self.started = Some(Instant::now());
        self.written = 0;
        log::info!("Null output running at {} Hz, {} channels", frequency, channels);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.started.is_some()
    }

    fn writable_frames(&self) -> usize {
        let Some(started) = self.started else {
            return 0;
        };
        let consumed = (started.elapsed().as_secs_f64() * self.frequency as f64) as u64;
        let due = consumed + self.capacity as u64;
        due.saturating_sub(self.written).min(self.capacity as u64) as usize
    }

    fn write(&mut self, block: &[f32]) {
        let frames = (block.len() / self.channels as usize) as u64;
        self.written += frames;
        let peak = block.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
        self.meter.frames.fetch_add(frames, Ordering::Relaxed);
        self.meter.peak_bits.store(peak.to_bits(), Ordering::Relaxed);
    }

    fn stop(&mut self) {
        self.started = None;
    }
}

#[cfg(feature = "system-output")]
pub use system::CpalDriver;

#[cfg(feature = "system-output")]
mod system {
    use super::{OutputDriver, OutputTarget};
    use crate::error::{AlError, Result};
    use crate::mixer::MixerDesc;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{FromSample, SizedSample};
    use crossbeam_channel::{Receiver, Sender};
    use ringbuf::traits::{Consumer, Observer, Producer, Split};
    use ringbuf::{HeapCons, HeapProd, HeapRb};
    use std::thread::JoinHandle;

    /// Output endpoints of the default cpal host.
    pub struct CpalDriver;

    impl CpalDriver {
        fn find_device(name: Option<&str>) -> Option<cpal::Device> {
            let host = cpal::default_host();
            match name {
                None => host.default_output_device(),
                Some(name) => host
                    .output_devices()
                    .ok()?
                    .find(|device| device.name().map(|n| n == name).unwrap_or(false)),
            }
        }
    }

    impl OutputDriver for CpalDriver {
        fn name(&self) -> &str {
            "System"
        }

        fn enumerate(&self, report: &mut dyn FnMut(&str)) {
            let host = cpal::default_host();
            match host.output_devices() {
                Ok(devices) => {
                    for device in devices {
                        if let Ok(name) = device.name() {
                            report(&name);
                        }
                    }
                }
                Err(e) => log::warn!("Failed to list output devices: {}", e),
            }
        }

        fn open(&self, name: Option<&str>, desc: &MixerDesc) -> Option<Box<dyn OutputTarget>> {
            // Resolve now so unknown names are declined, but build the stream
            // on its own thread later: cpal streams are not Send.
            Self::find_device(name)?;
            Some(Box::new(CpalOutput {
                device_name: name.map(str::to_string),
                ring_frames: desc.ring_frames(),
                channels: desc.channels.max(1),
                producer: None,
                stream: None,
            }))
        }
    }

    struct StreamThread {
        shutdown: Sender<()>,
        thread: JoinHandle<()>,
    }

    struct CpalOutput {
        device_name: Option<String>,
        ring_frames: usize,
        channels: u16,
        producer: Option<HeapProd<f32>>,
        stream: Option<StreamThread>,
    }

    impl OutputTarget for CpalOutput {
        fn start(&mut self, frequency: u32, channels: u16) -> Result<()> {
            if self.stream.is_some() {
                return Ok(());
            }

            let channels = channels.max(1);
            let ring = HeapRb::<f32>::new(self.ring_frames * channels as usize);
            let (producer, consumer) = ring.split();

            let (ready_tx, ready_rx) = crossbeam_channel::bounded::<std::result::Result<(), String>>(1);
            let (shutdown, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
            let device_name = self.device_name.clone();

            let thread = std::thread::Builder::new()
                .name("alcore-output".into())
                .spawn(move || {
                    run_stream(device_name, frequency, channels, consumer, ready_tx, shutdown_rx)
                })
                .map_err(|e| AlError::DeviceUnavailable(format!("Failed to spawn output thread: {}", e)))?;

            let ready = ready_rx
                .recv()
                .unwrap_or_else(|_| Err("Output thread exited early".to_string()));
            if let Err(message) = ready {
                let _ = thread.join();
                return Err(AlError::DeviceUnavailable(message));
            }

            self.channels = channels;
            self.producer = Some(producer);
            self.stream = Some(StreamThread { shutdown, thread });
            log::info!(
                "System output '{}' running at {} Hz, {} channels",
                self.device_name.as_deref().unwrap_or("default"),
                frequency,
                channels
            );
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.stream.is_some()
        }

        fn writable_frames(&self) -> usize {
            self.producer
                .as_ref()
                .map(|producer| producer.vacant_len() / self.channels as usize)
                .unwrap_or(0)
        }

        fn write(&mut self, block: &[f32]) {
            if let Some(producer) = self.producer.as_mut() {
                let pushed = producer.push_slice(block);
                if pushed < block.len() {
                    log::warn!("Output ring overflow, dropped {} samples", block.len() - pushed);
                }
            }
        }

        fn stop(&mut self) {
            if let Some(stream) = self.stream.take() {
                let _ = stream.shutdown.send(());
                if stream.thread.join().is_err() {
                    log::error!("Output thread panicked");
                }
            }
            self.producer = None;
        }
    }

    impl Drop for CpalOutput {
        fn drop(&mut self) {
            self.stop();
        }
    }

    fn run_stream(
        device_name: Option<String>,
        frequency: u32,
        channels: u16,
        consumer: HeapCons<f32>,
        ready: Sender<std::result::Result<(), String>>,
        shutdown: Receiver<()>,
    ) {
        let stream = match build_stream(device_name.as_deref(), frequency, channels, consumer) {
            Ok(stream) => stream,
            Err(message) => {
                let _ = ready.send(Err(message));
                return;
            }
        };
        if let Err(e) = stream.play() {
            let _ = ready.send(Err(format!("Failed to start stream: {}", e)));
            return;
        }
        let _ = ready.send(Ok(()));

        let _ = shutdown.recv();
        drop(stream);
        log::info!("System output stopped");
    }

    fn build_stream(
        device_name: Option<&str>,
        frequency: u32,
        channels: u16,
        consumer: HeapCons<f32>,
    ) -> std::result::Result<cpal::Stream, String> {
        let device = CpalDriver::find_device(device_name)
            .ok_or_else(|| format!("Output device {:?} disappeared", device_name))?;

        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(frequency),
            buffer_size: cpal::BufferSize::Default,
        };
        let default_config = device
            .default_output_config()
            .map_err(|e| format!("Failed to get default config: {}", e))?;

        match default_config.sample_format() {
            cpal::SampleFormat::F32 => create_stream::<f32>(&device, &config, consumer),
            cpal::SampleFormat::I16 => create_stream::<i16>(&device, &config, consumer),
            cpal::SampleFormat::U16 => create_stream::<u16>(&device, &config, consumer),
            other => Err(format!("Unsupported sample format {:?}", other)),
        }
    }

    fn create_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut consumer: HeapCons<f32>,
    ) -> std::result::Result<cpal::Stream, String>
    where
        T: SizedSample + FromSample<f32>,
    {
        let mut scratch: Vec<f32> = Vec::new();
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    let read = consumer.pop_slice(&mut scratch[..]);
                    for (i, sample) in data.iter_mut().enumerate() {
                        let value = if i < read { scratch[i] } else { 0.0 };
                        *sample = T::from_sample(value);
                    }
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| format!("Failed to build stream: {}", e))
    }
}
