use super::{Device, DeviceState, SourceEntry};
use crate::error::{AlError, Result};
use crate::format::BufferFormat;
use crate::state::{BufferName, ContextId, PlayState, SourceName, SourceParam, SourceState};

/// Upper bound on preallocation for caller-supplied counts
pub(super) const CAPACITY_HINT: usize = 256;

impl Device {
    /// Allocates `count` sources in `context`.
    ///
    /// Either every source is allocated or none is. Asking for more than the
    /// device's `max_sources` ceiling allows fails with `OutOfMemory` without
    /// calling the backend, so probing capacity in a loop always terminates.
    pub fn gen_sources(&self, context: ContextId, count: usize) -> Result<Vec<SourceName>> {
        let result = self.gen_sources_inner(context, count);
        self.track(Some(context), result)
    }

    fn gen_sources_inner(&self, context: ContextId, count: usize) -> Result<Vec<SourceName>> {
        let mut state = self.shared.state.lock();
        state.ensure_open()?;
        state.context(context)?;

        let max = self.shared.desc.max_sources;
        let wanted = state.sources_allocated.checked_add(count);
        if wanted.is_none_or(|total| total > max) {
            return Err(AlError::OutOfMemory(format!(
                "{} sources requested, {} of {} in use",
                count, state.sources_allocated, max
            )));
        }

        let backend = &self.shared.backend;
        let mut handles = Vec::with_capacity(count.min(CAPACITY_HINT));
        {
            let entry = state.context(context)?;
            for _ in 0..count {
                match backend.allocate_source(&entry.handle) {
                    Some(handle) => handles.push(handle),
                    None => {
                        log::warn!(
                            "Backend refused a source after {} of {}; rolling back",
                            handles.len(),
                            count
                        );
                        for handle in handles {
                            backend.free_source(handle);
                        }
                        return Err(AlError::OutOfMemory(
                            "Backend could not allocate a source".into(),
                        ));
                    }
                }
            }
        }

        let names: Vec<SourceName> = (0..count).map(|_| state.next_source_name()).collect();
        state.sources_allocated += count;

        let entry = state.context_mut(context)?;
        for (name, handle) in names.iter().zip(handles) {
            entry.sources.insert(
                *name,
                SourceEntry {
                    handle,
                    state: SourceState::default(),
                    dirty: true,
                },
            );
        }

        log::debug!("Allocated {} sources in {}", count, context);
        Ok(names)
    }

    /// Frees the named sources, releasing their slots and buffer references.
    ///
    /// Every name is checked before anything is freed.
    pub fn delete_sources(&self, context: ContextId, names: &[SourceName]) -> Result<()> {
        let result = (|| -> Result<()> {
            let mut state = self.shared.state.lock();
            state.ensure_open()?;

            let entry = state.context(context)?;
            for name in names {
                entry.source(*name)?;
            }

            for name in names {
                let Some(source) = state.context_mut(context)?.sources.remove(name) else {
                    continue;
                };
                state.release_buffers(&source.state.queue);
                state.sources_allocated -= 1;
                self.shared.backend.free_source(source.handle);
            }

            log::debug!("Freed {} sources in {}", names.len(), context);
            Ok(())
        })();
        self.track(Some(context), result)
    }

    pub fn is_source(&self, context: ContextId, name: SourceName) -> bool {
        let state = self.shared.state.lock();
        state
            .context(context)
            .map(|entry| entry.sources.contains_key(&name))
            .unwrap_or(false)
    }

    /// Updates one field of a source. Unchanged values do not mark it dirty.
    pub fn set_source(&self, context: ContextId, name: SourceName, param: SourceParam) -> Result<()> {
        let result = self.with_source(context, name, |_, source| source.apply(param));
        self.track(Some(context), result)
    }

    /// Application view of a source.
    ///
    /// The play state is what the application last requested; it does not
    /// follow the backend running off the end of a non-looping queue.
    pub fn source_state(&self, context: ContextId, name: SourceName) -> Result<SourceState> {
        let result = (|| -> Result<SourceState> {
            let state = self.shared.state.lock();
            Ok(state.context(context)?.source(name)?.state.clone())
        })();
        self.track(Some(context), result)
    }

    /// Attaches `buffer` as the source's only queue entry, or detaches everything.
    pub fn set_source_buffer(
        &self,
        context: ContextId,
        name: SourceName,
        buffer: Option<BufferName>,
    ) -> Result<()> {
        let result = (|| -> Result<()> {
            let mut state = self.shared.state.lock();
            state.ensure_open()?;
            if let Some(buffer) = buffer {
                buffer_entry_format(&state, buffer)?;
            }

            let source = state.context_mut(context)?.source_mut(name)?;
            if source.state.is_active() {
                return Err(AlError::InvalidOperation(format!(
                    "Cannot attach a buffer to {} while it is {:?}",
                    name, source.state.play_state
                )));
            }
            let old_queue = std::mem::replace(&mut source.state.queue, buffer.into_iter().collect());
            source.dirty = true;

            state.release_buffers(&old_queue);
            if let Some(buffer) = buffer {
                if let Some(entry) = state.buffers.get_mut(&buffer) {
                    entry.refs += 1;
                }
            }
            Ok(())
        })();
        self.track(Some(context), result)
    }

    /// Appends buffers to the source's queue.
    ///
    /// All buffers holding data in one queue must share a format.
    pub fn queue_buffers(
        &self,
        context: ContextId,
        name: SourceName,
        buffers: &[BufferName],
    ) -> Result<()> {
        let result = (|| -> Result<()> {
            let mut state = self.shared.state.lock();
            state.ensure_open()?;

            let queued = state.context(context)?.source(name)?.state.queue.clone();
            let mut format: Option<BufferFormat> = None;
            for buffer in queued.iter().chain(buffers) {
                match (format, buffer_entry_format(&state, *buffer)?) {
                    (_, None) => {}
                    (None, found) => format = found,
                    (Some(expected), Some(found)) if expected != found => {
                        return Err(AlError::InvalidOperation(format!(
                            "{} is {:?} but {} queues {:?}",
                            buffer, found, name, expected
                        )));
                    }
                    _ => {}
                }
            }

            for buffer in buffers {
                if let Some(entry) = state.buffers.get_mut(buffer) {
                    entry.refs += 1;
                }
            }
            let source = state.context_mut(context)?.source_mut(name)?;
            source.state.queue.extend_from_slice(buffers);
            source.dirty = true;
            Ok(())
        })();
        self.track(Some(context), result)
    }

    /// Removes `count` finished buffers from the head of the queue.
    ///
    /// A stopped or initial source has finished with its whole queue; a playing
    /// or paused one with none of it.
    pub fn unqueue_buffers(
        &self,
        context: ContextId,
        name: SourceName,
        count: usize,
    ) -> Result<Vec<BufferName>> {
        let result = (|| -> Result<Vec<BufferName>> {
            let mut state = self.shared.state.lock();
            state.ensure_open()?;

            let source = state.context_mut(context)?.source_mut(name)?;
            let processed = if source.state.is_active() {
                0
            } else {
                source.state.queue.len()
            };
            if count > processed {
                return Err(AlError::InvalidValue(format!(
                    "Cannot unqueue {} buffers from {}, {} processed",
                    count, name, processed
                )));
            }
            let removed: Vec<BufferName> = source.state.queue.drain(..count).collect();
            if !removed.is_empty() {
                source.dirty = true;
            }

            state.release_buffers(&removed);
            Ok(removed)
        })();
        self.track(Some(context), result)
    }

    /// Starts a source from the beginning, or resumes it if paused.
    ///
    /// Playing a source that is already playing (or has run off the end of its
    /// queue) restarts it.
    pub fn play_source(&self, context: ContextId, name: SourceName) -> Result<()> {
        let result = self.with_source(context, name, |_, source| {
            if source.play_state != PlayState::Paused {
                source.start_count = source.start_count.wrapping_add(1);
            }
            source.play_state = PlayState::Playing;
            Ok(true)
        });
        self.track(Some(context), result)
    }

    /// Pauses a playing source; has no effect in any other state.
    pub fn pause_source(&self, context: ContextId, name: SourceName) -> Result<()> {
        self.transition(context, name, |current| match current {
            PlayState::Playing => PlayState::Paused,
            other => other,
        })
    }

    pub fn stop_source(&self, context: ContextId, name: SourceName) -> Result<()> {
        self.transition(context, name, |_| PlayState::Stopped)
    }

    pub fn rewind_source(&self, context: ContextId, name: SourceName) -> Result<()> {
        self.transition(context, name, |_| PlayState::Initial)
    }

    fn transition(
        &self,
        context: ContextId,
        name: SourceName,
        next: impl FnOnce(PlayState) -> PlayState,
    ) -> Result<()> {
        let result = self.with_source(context, name, |_, source| {
            let target = next(source.play_state);
            let changed = target != source.play_state;
            source.play_state = target;
            Ok(changed)
        });
        self.track(Some(context), result)
    }

    /// Runs `update` on a source's state, marking it dirty if it reports a change.
    fn with_source(
        &self,
        context: ContextId,
        name: SourceName,
        update: impl FnOnce(SourceName, &mut SourceState) -> Result<bool>,
    ) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.ensure_open()?;
        let source = state.context_mut(context)?.source_mut(name)?;
        if update(name, &mut source.state)? {
            source.dirty = true;
        }
        Ok(())
    }
}

/// Format of a buffer's data, failing for unknown names.
fn buffer_entry_format(state: &DeviceState, name: BufferName) -> Result<Option<BufferFormat>> {
    state
        .buffers
        .get(&name)
        .map(|entry| entry.state.format)
        .ok_or_else(|| AlError::InvalidName(format!("Unknown buffer {}", name)))
}
