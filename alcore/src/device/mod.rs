//! Devices and everything they own.
//!
//! A [`Device`] binds exactly one opened backend and owns its contexts, the
//! sources inside those contexts, and the device-wide buffer pool. Every
//! mutator only updates application-side state and marks the object dirty; the
//! backend sees the change at the next processing cycle (see [`crate::engine`]).
//!
//! # Locking
//!
//! - `state` guards all object state, dirty flags and the source counter. It is
//!   held for bookkeeping and for the commit section of a cycle, never across
//!   `upkeep`, a buffer upload, or backend configuration.
//! - `cycle` serialises processing cycles, so a device has one processing path.
//! - `backend_calls` is read-held by backend calls made without `state`
//!   (uploads, context setup) and write-held by close, so the backend is never
//!   closed under them.
//!
//! Lock order is `processor`, `cycle`, `backend_calls`, `state`.

mod buffers;
mod contexts;
mod sources;

use crate::backend::{BackendDevice, BufferImpl, ContextImpl, SourceImpl};
use crate::config::DeviceDesc;
use crate::engine::Processor;
use crate::error::{AlError, ErrorKind, ErrorRegister, Result};
use crate::state::{BufferName, BufferState, ContextId, ListenerState, SourceName, SourceState};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// An open audio device.
///
/// Obtained from [`DeviceRegistry::open_device`](crate::DeviceRegistry::open_device).
/// All methods take `&self` and may be called from any number of threads.
/// Dropping the device closes it.
pub struct Device {
    shared: Arc<DeviceShared>,
}

pub(crate) struct DeviceShared {
    pub(crate) name: String,
    pub(crate) backend_name: String,
    pub(crate) desc: DeviceDesc,
    pub(crate) backend: Box<dyn BackendDevice>,
    pub(crate) state: Mutex<DeviceState>,
    pub(crate) cycle: Mutex<()>,
    pub(crate) backend_calls: RwLock<()>,
    pub(crate) closing: AtomicBool,
    pub(crate) errors: ErrorRegister,
    pub(crate) processor: Mutex<Option<Processor>>,
}

pub(crate) struct DeviceState {
    pub(crate) contexts: Vec<ContextEntry>,
    pub(crate) buffers: BTreeMap<BufferName, BufferEntry>,
    /// Live sources across every context, checked against `max_sources`
    pub(crate) sources_allocated: usize,
    pub(crate) current: Option<ContextId>,
    pub(crate) closed: bool,
    next_context: u32,
    next_source: u32,
    next_buffer: u32,
}

pub(crate) struct ContextEntry {
    pub(crate) id: ContextId,
    pub(crate) handle: ContextImpl,
    pub(crate) listener: ListenerState,
    pub(crate) dirty: bool,
    pub(crate) suspended: bool,
    pub(crate) synchronous: bool,
    pub(crate) sources: BTreeMap<SourceName, SourceEntry>,
    pub(crate) errors: ErrorRegister,
}

pub(crate) struct SourceEntry {
    pub(crate) handle: SourceImpl,
    pub(crate) state: SourceState,
    pub(crate) dirty: bool,
}

pub(crate) struct BufferEntry {
    /// Shared only while an upload is running against it
    pub(crate) handle: Arc<BufferImpl>,
    pub(crate) state: BufferState,
    pub(crate) dirty: bool,
    /// An upload holds the buffer; a second one is refused
    pub(crate) uploading: bool,
    /// Number of queue slots, across all sources, naming this buffer
    pub(crate) refs: usize,
}

impl DeviceState {
    fn new() -> Self {
        Self {
            contexts: Vec::new(),
            buffers: BTreeMap::new(),
            sources_allocated: 0,
            current: None,
            closed: false,
            next_context: 1,
            next_source: 1,
            next_buffer: 1,
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(AlError::InvalidOperation("Device is closed".into()));
        }
        Ok(())
    }

    pub(crate) fn context(&self, id: ContextId) -> Result<&ContextEntry> {
        self.contexts
            .iter()
            .find(|context| context.id == id)
            .ok_or_else(|| AlError::InvalidName(format!("Unknown context {}", id)))
    }

    pub(crate) fn context_mut(&mut self, id: ContextId) -> Result<&mut ContextEntry> {
        self.contexts
            .iter_mut()
            .find(|context| context.id == id)
            .ok_or_else(|| AlError::InvalidName(format!("Unknown context {}", id)))
    }

    pub(crate) fn next_context_id(&mut self) -> ContextId {
        let id = ContextId(self.next_context);
        self.next_context = self.next_context.wrapping_add(1).max(1);
        id
    }

    pub(crate) fn next_source_name(&mut self) -> SourceName {
        let name = SourceName(self.next_source);
        self.next_source = self.next_source.wrapping_add(1).max(1);
        name
    }

    pub(crate) fn remaining_buffer_names(&self) -> usize {
        (u32::MAX - self.next_buffer) as usize
    }

    pub(crate) fn next_buffer_name(&mut self) -> Result<BufferName> {
        if self.next_buffer == u32::MAX {
            return Err(AlError::OutOfMemory("Buffer names exhausted".into()));
        }
        let name = BufferName(self.next_buffer);
        self.next_buffer += 1;
        Ok(name)
    }

    /// Drops one reference from every buffer in `queue`.
    pub(crate) fn release_buffers(&mut self, queue: &[BufferName]) {
        for name in queue {
            if let Some(buffer) = self.buffers.get_mut(name) {
                buffer.refs = buffer.refs.saturating_sub(1);
            }
        }
    }
}

impl ContextEntry {
    pub(crate) fn source(&self, name: SourceName) -> Result<&SourceEntry> {
        self.sources
            .get(&name)
            .ok_or_else(|| AlError::InvalidName(format!("Unknown source {} in {}", name, self.id)))
    }

    pub(crate) fn source_mut(&mut self, name: SourceName) -> Result<&mut SourceEntry> {
        let id = self.id;
        self.sources
            .get_mut(&name)
            .ok_or_else(|| AlError::InvalidName(format!("Unknown source {} in {}", name, id)))
    }
}

impl Device {
    pub(crate) fn new(
        name: String,
        backend_name: String,
        backend: Box<dyn BackendDevice>,
        desc: DeviceDesc,
    ) -> Self {
        log::info!(
            "Opened device '{}' on backend '{}' (max {} sources)",
            name,
            backend_name,
            desc.max_sources
        );

        Self {
            shared: Arc::new(DeviceShared {
                name,
                backend_name,
                desc,
                backend,
                state: Mutex::new(DeviceState::new()),
                cycle: Mutex::new(()),
                backend_calls: RwLock::new(()),
                closing: AtomicBool::new(false),
                errors: ErrorRegister::new(),
                processor: Mutex::new(None),
            }),
        }
    }

    /// The device name this device was opened with (`"default"` for the default device)
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Name of the backend kind that claimed this device
    pub fn backend_name(&self) -> &str {
        &self.shared.backend_name
    }

    pub fn desc(&self) -> &DeviceDesc {
        &self.shared.desc
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }

    /// Number of live sources across every context.
    pub fn source_count(&self) -> usize {
        self.shared.state.lock().sources_allocated
    }

    /// Reads and clears a sticky error register.
    ///
    /// `None` reads the device's own register, which collects errors raised while
    /// no context was current. An unknown context reports [`ErrorKind::InvalidName`].
    pub fn get_error(&self, context: Option<ContextId>) -> ErrorKind {
        match context {
            None => self.shared.errors.take(),
            Some(id) => {
                let state = self.shared.state.lock();
                match state.context(id) {
                    Ok(context) => context.errors.take(),
                    Err(_) => ErrorKind::InvalidName,
                }
            }
        }
    }

    /// Records the error of `result`, if any, and passes the result through.
    ///
    /// The error lands in the register of `scope` if it names a live context,
    /// otherwise in the current context's, otherwise in the device's.
    pub(crate) fn track<T>(&self, scope: Option<ContextId>, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            log::debug!("Device '{}': {}", self.shared.name, err);

            let state = self.shared.state.lock();
            let register = scope
                .and_then(|id| state.context(id).ok())
                .or_else(|| state.current.and_then(|id| state.context(id).ok()))
                .map(|context| &context.errors)
                .unwrap_or(&self.shared.errors);
            register.record(err.kind());
        }
        result
    }

    /// Closes the device, freeing every outstanding context, source and buffer.
    ///
    /// Waits for an in-flight processing cycle and any running buffer uploads
    /// to finish first. Calling it again is a no-op. Also run on drop.
    pub fn close(&self) {
        let shared = &self.shared;
        if shared.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        let processor = shared.processor.lock().take();
        if let Some(processor) = processor {
            processor.stop();
        }

        let _cycle = shared.cycle.lock();
        let _backend_calls = shared.backend_calls.write();
        let mut state = shared.state.lock();

        state.current = None;
        let contexts = std::mem::take(&mut state.contexts);
        let buffers = std::mem::take(&mut state.buffers);

        let mut contexts_freed = Vec::with_capacity(contexts.len());
        let mut sources_freed = 0;
        for context in contexts {
            for (_, source) in context.sources {
                shared.backend.free_source(source.handle);
                sources_freed += 1;
            }
            contexts_freed.push(context.handle);
        }
        state.sources_allocated = 0;

        let buffers_freed = buffers.len();
        for (name, buffer) in buffers {
            match Arc::try_unwrap(buffer.handle) {
                Ok(handle) => shared.backend.free_buffer(handle),
                Err(_) => log::warn!("Buffer {} still shared at close", name),
            }
        }

        let contexts_count = contexts_freed.len();
        for handle in contexts_freed {
            shared.backend.free_context(handle);
        }

        shared.backend.close();
        state.closed = true;

        log::info!(
            "Closed device '{}' ({} contexts, {} sources, {} buffers freed)",
            shared.name,
            contexts_count,
            sources_freed,
            buffers_freed
        );
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.shared.name)
            .field("backend", &self.shared.backend_name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
