use super::sources::CAPACITY_HINT;
use super::{BufferEntry, Device};
use crate::error::{AlError, Result};
use crate::format::BufferFormat;
use crate::state::{BufferName, BufferState};
use std::sync::Arc;

impl Device {
    /// Allocates `count` empty buffers in the device-wide pool.
    pub fn gen_buffers(&self, count: usize) -> Result<Vec<BufferName>> {
        let result = (|| -> Result<Vec<BufferName>> {
            let mut state = self.shared.state.lock();
            state.ensure_open()?;
            if count > state.remaining_buffer_names() {
                return Err(AlError::OutOfMemory(format!(
                    "{} buffers requested, {} names left",
                    count,
                    state.remaining_buffer_names()
                )));
            }

            let backend = &self.shared.backend;
            let mut allocated = Vec::with_capacity(count.min(CAPACITY_HINT));
            for _ in 0..count {
                match backend.allocate_buffer() {
                    Some(handle) => allocated.push(handle),
                    None => {
                        for handle in allocated {
                            backend.free_buffer(handle);
                        }
                        return Err(AlError::OutOfMemory(
                            "Backend could not allocate a buffer".into(),
                        ));
                    }
                }
            }

            let mut names = Vec::with_capacity(allocated.len());
            for handle in allocated {
                let name = state.next_buffer_name()?;
                state.buffers.insert(
                    name,
                    BufferEntry {
                        handle: Arc::new(handle),
                        state: BufferState::default(),
                        dirty: false,
                        uploading: false,
                        refs: 0,
                    },
                );
                names.push(name);
            }

            log::debug!("Allocated {} buffers", count);
            Ok(names)
        })();
        self.track(None, result)
    }

    /// Frees the named buffers.
    ///
    /// Fails with `InvalidOperation`, freeing nothing, if any of them is still
    /// queued on a source or has an upload in flight.
    pub fn delete_buffers(&self, names: &[BufferName]) -> Result<()> {
        let result = (|| -> Result<()> {
            let mut state = self.shared.state.lock();
            state.ensure_open()?;

            for name in names {
                let entry = state
                    .buffers
                    .get(name)
                    .ok_or_else(|| AlError::InvalidName(format!("Unknown buffer {}", name)))?;
                if entry.refs > 0 {
                    return Err(AlError::InvalidOperation(format!(
                        "{} is queued on {} source slots",
                        name, entry.refs
                    )));
                }
                if entry.uploading || Arc::strong_count(&entry.handle) > 1 {
                    return Err(AlError::InvalidOperation(format!(
                        "{} is being uploaded",
                        name
                    )));
                }
            }

            for name in names {
                let Some(entry) = state.buffers.remove(name) else {
                    continue;
                };
                match Arc::try_unwrap(entry.handle) {
                    Ok(handle) => self.shared.backend.free_buffer(handle),
                    Err(handle) => {
                        state.buffers.insert(*name, BufferEntry { handle, ..entry });
                    }
                }
            }

            log::debug!("Freed {} buffers", names.len());
            Ok(())
        })();
        self.track(None, result)
    }

    pub fn is_buffer(&self, name: BufferName) -> bool {
        self.shared.state.lock().buffers.contains_key(&name)
    }

    /// Uploads sample data into a buffer.
    ///
    /// The data is copied before this returns. The upload itself runs without
    /// the device state lock, so a slow conversion never stalls other callers;
    /// sources playing the buffer switch to the new data at the next cycle.
    pub fn buffer_data(
        &self,
        name: BufferName,
        format: BufferFormat,
        data: &[u8],
        frequency: u32,
    ) -> Result<()> {
        let result = self.buffer_data_inner(name, format, data, frequency);
        self.track(None, result)
    }

    fn buffer_data_inner(
        &self,
        name: BufferName,
        format: BufferFormat,
        data: &[u8],
        frequency: u32,
    ) -> Result<()> {
        format.validate(data)?;
        if frequency == 0 {
            return Err(AlError::InvalidValue("Buffer frequency must be positive".into()));
        }

        let _gate = self.shared.backend_calls.read();
        let handle = {
            let mut state = self.shared.state.lock();
            state.ensure_open()?;
            let entry = state
                .buffers
                .get_mut(&name)
                .ok_or_else(|| AlError::InvalidName(format!("Unknown buffer {}", name)))?;
            if entry.uploading {
                return Err(AlError::InvalidOperation(format!(
                    "{} already has an upload in flight",
                    name
                )));
            }
            entry.uploading = true;
            entry.handle.clone()
        };

        let uploaded = self
            .shared
            .backend
            .upload_buffer(&handle, format, data, frequency);

        // Data and metadata change together, under the same exclusive upload
        let mut state = self.shared.state.lock();
        if let Some(entry) = state.buffers.get_mut(&name) {
            entry.uploading = false;
            if uploaded.is_ok() {
                entry.state = BufferState {
                    format: Some(format),
                    frequency,
                    size: data.len(),
                };
                entry.dirty = true;
            }
        }
        drop(handle);
        uploaded?;

        log::debug!(
            "Uploaded {} bytes of {:?} at {} Hz into {}",
            data.len(),
            format,
            frequency,
            name
        );
        Ok(())
    }

    /// Metadata of the data last uploaded into a buffer.
    pub fn buffer_state(&self, name: BufferName) -> Result<BufferState> {
        let result = self
            .shared
            .state
            .lock()
            .buffers
            .get(&name)
            .map(|entry| entry.state)
            .ok_or_else(|| AlError::InvalidName(format!("Unknown buffer {}", name)));
        self.track(None, result)
    }
}
