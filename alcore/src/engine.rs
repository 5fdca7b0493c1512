//! The processing cycle that pushes dirty state into the backend.
//!
//! One cycle:
//!
//! 1. takes the device's cycle lock, then its state lock;
//! 2. commits every dirty buffer;
//! 3. commits every dirty source of every context being processed;
//! 4. commits every dirty context (listener block);
//! 5. releases the state lock;
//! 6. runs backend upkeep with only the cycle lock held.
//!
//! Synchronous contexts are processed on demand through
//! [`Device::process_context`](crate::Device::process_context). Asynchronous
//! ones are driven by a [`Processor`] thread per device.

use crate::backend::{BackendDevice, BufferImpl, BufferSnapshot, ContextSnapshot, SourceSnapshot};
use crate::device::{DeviceShared, DeviceState};
use crate::error::{AlError, Result};
use crossbeam_channel::{Sender, select};
use std::sync::Weak;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;

/// Number of objects a processing cycle committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub buffers: usize,
    pub sources: usize,
    pub contexts: usize,
}

impl CycleReport {
    pub fn is_empty(&self) -> bool {
        self.buffers == 0 && self.sources == 0 && self.contexts == 0
    }
}

impl DeviceShared {
    /// Runs one processing cycle. Returns `None` once the device is closing.
    ///
    /// With `include_synchronous` false, synchronous contexts are left alone.
    pub(crate) fn run_cycle(&self, include_synchronous: bool) -> Option<CycleReport> {
        if self.closing.load(Ordering::Acquire) {
            return None;
        }
        let _cycle = self.cycle.lock();
        if self.closing.load(Ordering::Acquire) {
            return None;
        }

        let report = {
            let mut state = self.state.lock();
            if state.closed {
                return None;
            }
            commit_dirty(&*self.backend, &mut state, include_synchronous)
        };

        if !report.is_empty() {
            log::trace!(
                "Committed {} buffers, {} sources, {} contexts on '{}'",
                report.buffers,
                report.sources,
                report.contexts,
                self.name
            );
        }

        self.backend.upkeep();
        Some(report)
    }
}

fn commit_dirty(
    backend: &dyn BackendDevice,
    state: &mut DeviceState,
    include_synchronous: bool,
) -> CycleReport {
    let mut report = CycleReport::default();
    let DeviceState {
        contexts, buffers, ..
    } = state;

    for (name, entry) in buffers.iter_mut().filter(|(_, entry)| entry.dirty) {
        backend.commit_buffer(&BufferSnapshot {
            name: *name,
            buffer: &entry.handle,
            state: entry.state,
        });
        entry.dirty = false;
        report.buffers += 1;
    }

    let buffers = &*buffers;
    let processed = |suspended: bool, synchronous: bool| {
        !suspended && (include_synchronous || !synchronous)
    };

    for context in contexts
        .iter_mut()
        .filter(|context| processed(context.suspended, context.synchronous))
    {
        for (name, source) in context.sources.iter_mut().filter(|(_, s)| s.dirty) {
            let queued: Vec<&BufferImpl> = source
                .state
                .queue
                .iter()
                .filter_map(|buffer| buffers.get(buffer))
                .map(|entry| &*entry.handle)
                .collect();

            backend.commit_source(&SourceSnapshot {
                name: *name,
                context: &context.handle,
                source: &source.handle,
                state: source.state.clone(),
                buffers: queued,
            });
            source.dirty = false;
            report.sources += 1;
        }
    }

    for context in contexts
        .iter_mut()
        .filter(|context| context.dirty && processed(context.suspended, context.synchronous))
    {
        backend.commit_context(&ContextSnapshot {
            id: context.id,
            context: &context.handle,
            listener: context.listener.clone(),
        });
        context.dirty = false;
        report.contexts += 1;
    }

    report
}

/// Background thread that runs a processing cycle on every tick.
///
/// Holds only a weak reference to the device, so it never keeps one alive.
pub(crate) struct Processor {
    shutdown: Sender<()>,
    thread: JoinHandle<()>,
}

impl Processor {
    pub(crate) fn spawn(device: Weak<DeviceShared>, interval: Duration) -> Result<Self> {
        let (shutdown, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let ticker = crossbeam_channel::tick(interval);

        let thread = std::thread::Builder::new()
            .name("alcore-processor".into())
            .spawn(move || {
                log::info!("Processor thread started ({:?} interval)", interval);
                loop {
                    select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let Some(device) = device.upgrade() else { break };
                            if device.run_cycle(false).is_none() {
                                break;
                            }
                        }
                    }
                }
                log::info!("Processor thread stopped");
            })
            .map_err(|e| AlError::OutOfMemory(format!("Failed to spawn processor thread: {}", e)))?;

        Ok(Self { shutdown, thread })
    }

    /// Signals the thread and waits for its current cycle to finish.
    pub(crate) fn stop(self) {
        let _ = self.shutdown.send(());
        if self.thread.join().is_err() {
            log::error!("Processor thread panicked");
        }
    }
}
