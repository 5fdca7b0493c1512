//! Recording backend for exercising the engine without audio hardware.

use crate::backend::{
    Backend, BackendDevice, BufferImpl, BufferSnapshot, ContextImpl, ContextSnapshot,
    DeviceRegistry, SourceImpl, SourceSnapshot,
};
use crate::config::ContextAttributes;
use crate::error::{AlError, Result};
use crate::format::BufferFormat;
use crate::state::{BufferState, ListenerState, SourceState};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// One call made through the backend contract.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Configure(ContextAttributes),
    Close,
    AllocateContext(u64),
    FreeContext(u64),
    AllocateSource(u64),
    FreeSource(u64),
    AllocateBuffer(u64),
    FreeBuffer(u64),
    Upload {
        buffer: u64,
        format: BufferFormat,
        len: usize,
        frequency: u32,
    },
    CommitSource {
        source: u64,
        state: SourceState,
        buffers: Vec<u64>,
    },
    CommitBuffer {
        buffer: u64,
        state: BufferState,
    },
    CommitContext {
        context: u64,
        listener: ListenerState,
    },
    Upkeep,
}

impl Call {
    pub(crate) fn is_commit(&self) -> bool {
        matches!(
            self,
            Self::CommitSource { .. } | Self::CommitBuffer { .. } | Self::CommitContext { .. }
        )
    }
}

/// Call log shared between a [`RecordingBackend`] and the devices it opens.
#[derive(Default)]
pub(crate) struct Recorder {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU64,
    source_capacity: AtomicUsize,
    live_sources: AtomicUsize,
    commit_delay_ms: AtomicU64,
    upkeep_delay_ms: AtomicU64,
    upload_delay_ms: AtomicU64,
    configure_delay_ms: AtomicU64,
    closed: AtomicBool,
    used_after_close: AtomicBool,
    reject_frequency_change: AtomicBool,
    configured_frequency: Mutex<Option<u32>>,
}

impl Recorder {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            source_capacity: AtomicUsize::new(usize::MAX),
            ..Default::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub(crate) fn clear(&self) {
        self.calls.lock().clear();
    }

    pub(crate) fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    pub(crate) fn source_commits(&self) -> Vec<SourceState> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::CommitSource { state, .. } => Some(state.clone()),
                _ => None,
            })
            .collect()
    }

    /// Backend-side limit on live sources, below the engine's own ceiling.
    pub(crate) fn set_source_capacity(&self, capacity: usize) {
        self.source_capacity.store(capacity, Ordering::SeqCst);
    }

    pub(crate) fn set_commit_delay(&self, delay: Duration) {
        self.commit_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn set_upkeep_delay(&self, delay: Duration) {
        self.upkeep_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn set_upload_delay(&self, delay: Duration) {
        self.upload_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn set_configure_delay(&self, delay: Duration) {
        self.configure_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn reject_frequency_change(&self) {
        self.reject_frequency_change.store(true, Ordering::SeqCst);
    }

    pub(crate) fn used_after_close(&self) -> bool {
        self.used_after_close.load(Ordering::SeqCst)
    }

    fn push(&self, call: Call) {
        if self.closed.load(Ordering::SeqCst) {
            self.used_after_close.store(true, Ordering::SeqCst);
        }
        self.calls.lock().push(call);
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn sleep(delay_ms: &AtomicU64) {
        let ms = delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms));
        }
    }
}

/// Backend kind that claims either every name or a fixed list of names.
pub(crate) struct RecordingBackend {
    name: String,
    claims: Option<Vec<String>>,
    recorder: Arc<Recorder>,
    opens: AtomicUsize,
    last_requested: Mutex<Option<Option<String>>>,
}

impl RecordingBackend {
    /// Claims any device name, including the default device.
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            name: "Recording[*]".to_string(),
            claims: None,
            recorder: Arc::new(Recorder::new()),
            opens: AtomicUsize::new(0),
            last_requested: Mutex::new(None),
        })
    }

    /// Claims only the listed names.
    pub(crate) fn claiming(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: format!("Recording[{}]", names.join(",")),
            claims: Some(names.iter().map(|name| name.to_string()).collect()),
            recorder: Arc::new(Recorder::new()),
            opens: AtomicUsize::new(0),
            last_requested: Mutex::new(None),
        })
    }

    pub(crate) fn recorder(&self) -> Arc<Recorder> {
        self.recorder.clone()
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn last_requested_name(&self) -> Option<Option<String>> {
        self.last_requested.lock().clone()
    }
}

impl Backend for RecordingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn enumerate(&self, report: &mut dyn FnMut(&str)) {
        if let Some(claims) = &self.claims {
            for name in claims {
                report(name);
            }
        }
    }

    fn open(&self, device_name: Option<&str>) -> Option<Box<dyn BackendDevice>> {
        *self.last_requested.lock() = Some(device_name.map(str::to_string));

        let claimed = match (&self.claims, device_name) {
            (None, _) => true,
            (Some(claims), Some(name)) => claims.iter().any(|claim| claim == name),
            (Some(_), None) => false,
        };
        if !claimed {
            return None;
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        self.recorder.closed.store(false, Ordering::SeqCst);
        Some(Box::new(RecordingDevice {
            recorder: self.recorder.clone(),
        }))
    }
}

struct RecordingDevice {
    recorder: Arc<Recorder>,
}

impl BackendDevice for RecordingDevice {
    fn configure(&self, attributes: &ContextAttributes) -> Result<()> {
        self.recorder.push(Call::Configure(attributes.clone()));
        Recorder::sleep(&self.recorder.configure_delay_ms);

        let mut configured = self.recorder.configured_frequency.lock();
        if let Some(requested) = attributes.frequency {
            match *configured {
                Some(current)
                    if current != requested
                        && self.recorder.reject_frequency_change.load(Ordering::SeqCst) =>
                {
                    return Err(AlError::InvalidOperation(format!(
                        "Output already running at {} Hz",
                        current
                    )));
                }
                _ => *configured = Some(requested),
            }
        }
        Ok(())
    }

    fn close(&self) {
        self.recorder.push(Call::Close);
        self.recorder.closed.store(true, Ordering::SeqCst);
    }

    fn allocate_context(&self) -> Option<ContextImpl> {
        let id = self.recorder.next_id();
        self.recorder.push(Call::AllocateContext(id));
        Some(ContextImpl::new(id))
    }

    fn free_context(&self, context: ContextImpl) {
        self.recorder.push(Call::FreeContext(context.raw()));
    }

    fn allocate_source(&self, _context: &ContextImpl) -> Option<SourceImpl> {
        let live = self.recorder.live_sources.load(Ordering::SeqCst);
        if live >= self.recorder.source_capacity.load(Ordering::SeqCst) {
            return None;
        }
        self.recorder.live_sources.fetch_add(1, Ordering::SeqCst);

        let id = self.recorder.next_id();
        self.recorder.push(Call::AllocateSource(id));
        Some(SourceImpl::new(id))
    }

    fn free_source(&self, source: SourceImpl) {
        self.recorder.live_sources.fetch_sub(1, Ordering::SeqCst);
        self.recorder.push(Call::FreeSource(source.raw()));
    }

    fn allocate_buffer(&self) -> Option<BufferImpl> {
        let id = self.recorder.next_id();
        self.recorder.push(Call::AllocateBuffer(id));
        Some(BufferImpl::new(id))
    }

    fn free_buffer(&self, buffer: BufferImpl) {
        self.recorder.push(Call::FreeBuffer(buffer.raw()));
    }

    fn upload_buffer(
        &self,
        buffer: &BufferImpl,
        format: BufferFormat,
        data: &[u8],
        frequency: u32,
    ) -> Result<()> {
        self.recorder.push(Call::Upload {
            buffer: buffer.raw(),
            format,
            len: data.len(),
            frequency,
        });
        Recorder::sleep(&self.recorder.upload_delay_ms);
        Ok(())
    }

    fn commit_source(&self, source: &SourceSnapshot<'_>) {
        Recorder::sleep(&self.recorder.commit_delay_ms);
        self.recorder.push(Call::CommitSource {
            source: source.source.raw(),
            state: source.state.clone(),
            buffers: source.buffers.iter().map(|buffer| buffer.raw()).collect(),
        });
    }

    fn commit_buffer(&self, buffer: &BufferSnapshot<'_>) {
        Recorder::sleep(&self.recorder.commit_delay_ms);
        self.recorder.push(Call::CommitBuffer {
            buffer: buffer.buffer.raw(),
            state: buffer.state,
        });
    }

    fn commit_context(&self, context: &ContextSnapshot<'_>) {
        Recorder::sleep(&self.recorder.commit_delay_ms);
        self.recorder.push(Call::CommitContext {
            context: context.context.raw(),
            listener: context.listener.clone(),
        });
    }

    fn upkeep(&self) {
        Recorder::sleep(&self.recorder.upkeep_delay_ms);
        self.recorder.push(Call::Upkeep);
    }
}

pub(crate) fn registry_of(backends: &[&Arc<RecordingBackend>]) -> DeviceRegistry {
    DeviceRegistry::new(
        backends
            .iter()
            .map(|backend| (*backend).clone() as Arc<dyn Backend>)
            .collect(),
    )
}

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
