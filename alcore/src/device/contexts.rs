use super::{ContextEntry, Device};
use crate::config::ContextAttributes;
use crate::engine::{CycleReport, Processor};
use crate::error::{AlError, ErrorRegister, Result};
use crate::math::{Orientation, Vec3};
use crate::state::{ContextId, DistanceModel, ListenerParam, ListenerState};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

impl Device {
    /// Configures the backend for `attributes` and creates a context.
    ///
    /// Unrecognised attributes are handed to the backend untouched. Unless the
    /// attributes request a synchronous context, the device's processing thread
    /// is started (once) to drive it.
    pub fn create_context(&self, attributes: &ContextAttributes) -> Result<ContextId> {
        let result = self.create_context_inner(attributes);
        self.track(None, result)
    }

    fn create_context_inner(&self, attributes: &ContextAttributes) -> Result<ContextId> {
        let id = {
            // Configuration may start an output stream; keep it off the state lock.
            let _gate = self.shared.backend_calls.read();
            self.shared.state.lock().ensure_open()?;

            self.shared.backend.configure(attributes)?;
            let handle = self
                .shared
                .backend
                .allocate_context()
                .ok_or_else(|| AlError::OutOfMemory("Backend could not allocate a context".into()))?;

            // Close waits for the gate, so the device is still open
            let mut state = self.shared.state.lock();
            let id = state.next_context_id();
            state.contexts.push(ContextEntry {
                id,
                handle,
                listener: ListenerState::default(),
                dirty: true,
                suspended: false,
                synchronous: attributes.synchronous,
                sources: BTreeMap::new(),
                errors: ErrorRegister::new(),
            });
            id
        };

        log::info!(
            "Created {} context {} on '{}'",
            if attributes.synchronous { "synchronous" } else { "asynchronous" },
            id,
            self.shared.name
        );

        if !attributes.synchronous {
            let interval = attributes
                .update_interval()
                .unwrap_or(self.shared.desc.update_interval);
            if let Err(err) = self.ensure_processor(interval) {
                self.remove_context(id)?;
                return Err(err);
            }
        }

        Ok(id)
    }

    fn ensure_processor(&self, interval: Duration) -> Result<()> {
        let mut processor = self.shared.processor.lock();
        if processor.is_some() || self.shared.closing.load(Ordering::Acquire) {
            return Ok(());
        }
        *processor = Some(Processor::spawn(Arc::downgrade(&self.shared), interval)?);
        Ok(())
    }

    /// Frees a context along with every source it still owns.
    ///
    /// The current context cannot be destroyed; clear it with
    /// [`make_context_current(None)`](Device::make_context_current) first.
    pub fn destroy_context(&self, context: ContextId) -> Result<()> {
        let result = self.remove_context(context);
        self.track(None, result)
    }

    fn remove_context(&self, id: ContextId) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.ensure_open()?;

        if state.current == Some(id) {
            return Err(AlError::InvalidOperation(format!(
                "{} is the current context",
                id
            )));
        }
        let index = state
            .contexts
            .iter()
            .position(|context| context.id == id)
            .ok_or_else(|| AlError::InvalidName(format!("Unknown context {}", id)))?;

        let context = state.contexts.remove(index);
        let freed = context.sources.len();
        for (_, source) in context.sources {
            state.release_buffers(&source.state.queue);
            state.sources_allocated -= 1;
            self.shared.backend.free_source(source.handle);
        }
        self.shared.backend.free_context(context.handle);

        log::info!("Destroyed context {} ({} sources freed)", id, freed);
        Ok(())
    }

    /// Selects the context that receives errors from device-level operations.
    pub fn make_context_current(&self, context: Option<ContextId>) -> Result<()> {
        let result = (|| -> Result<()> {
            let mut state = self.shared.state.lock();
            state.ensure_open()?;
            if let Some(id) = context {
                state.context(id)?;
            }
            state.current = context;
            Ok(())
        })();
        self.track(None, result)
    }

    pub fn current_context(&self) -> Option<ContextId> {
        self.shared.state.lock().current
    }

    /// Live contexts in creation order.
    pub fn contexts(&self) -> Vec<ContextId> {
        self.shared
            .state
            .lock()
            .contexts
            .iter()
            .map(|context| context.id)
            .collect()
    }

    /// Stops committing the context's changes until it is processed again.
    ///
    /// Mutations still mark its objects dirty; nothing is lost while suspended.
    pub fn suspend_context(&self, context: ContextId) -> Result<()> {
        let result = (|| -> Result<()> {
            let mut state = self.shared.state.lock();
            state.ensure_open()?;
            state.context_mut(context)?.suspended = true;
            Ok(())
        })();
        self.track(Some(context), result)
    }

    pub fn is_suspended(&self, context: ContextId) -> Result<bool> {
        let result = self
            .shared
            .state
            .lock()
            .context(context)
            .map(|entry| entry.suspended);
        self.track(Some(context), result)
    }

    /// Resumes `context` and runs one full processing cycle on the device.
    ///
    /// This is how synchronous contexts are driven.
    pub fn process_context(&self, context: ContextId) -> Result<CycleReport> {
        let result = (|| -> Result<CycleReport> {
            {
                let mut state = self.shared.state.lock();
                state.ensure_open()?;
                state.context_mut(context)?.suspended = false;
            }
            self.shared
                .run_cycle(true)
                .ok_or_else(|| AlError::InvalidOperation("Device is closing".into()))
        })();
        self.track(Some(context), result)
    }

    /// Updates one field of the context's listener block.
    pub fn set_listener(&self, context: ContextId, param: ListenerParam) -> Result<()> {
        let result = (|| -> Result<()> {
            let mut state = self.shared.state.lock();
            state.ensure_open()?;
            let entry = state.context_mut(context)?;
            if entry.listener.apply(param)? {
                entry.dirty = true;
            }
            Ok(())
        })();
        self.track(Some(context), result)
    }

    /// Application view of the context's listener block.
    pub fn listener(&self, context: ContextId) -> Result<ListenerState> {
        let result = self
            .shared
            .state
            .lock()
            .context(context)
            .map(|entry| entry.listener.clone());
        self.track(Some(context), result)
    }

    pub fn set_listener_position(&self, context: ContextId, position: Vec3) -> Result<()> {
        self.set_listener(context, ListenerParam::Position(position))
    }

    pub fn set_listener_orientation(
        &self,
        context: ContextId,
        orientation: Orientation,
    ) -> Result<()> {
        self.set_listener(context, ListenerParam::Orientation(orientation))
    }

    pub fn set_distance_model(&self, context: ContextId, model: DistanceModel) -> Result<()> {
        self.set_listener(context, ListenerParam::DistanceModel(model))
    }

    pub fn set_doppler_factor(&self, context: ContextId, factor: f32) -> Result<()> {
        self.set_listener(context, ListenerParam::DopplerFactor(factor))
    }

    pub fn set_speed_of_sound(&self, context: ContextId, speed: f32) -> Result<()> {
        self.set_listener(context, ListenerParam::SpeedOfSound(speed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::open_recording;
    use crate::error::ErrorKind;
    use crate::testing::Call;

    #[test]
    fn test_destroying_current_context_is_rejected() {
        let (device, context, recorder) = open_recording(4);

        assert!(matches!(
            device.destroy_context(context),
            Err(AlError::InvalidOperation(_))
        ));
        assert_eq!(recorder.count(|c| matches!(c, Call::FreeContext(_))), 0);

        device.make_context_current(None).unwrap();
        device.destroy_context(context).unwrap();
        assert_eq!(recorder.count(|c| matches!(c, Call::FreeContext(_))), 1);
        assert!(device.contexts().is_empty());
    }

    #[test]
    fn test_destroy_frees_sources_and_their_slots() {
        let (device, first, recorder) = open_recording(2);
        let second = device
            .create_context(&ContextAttributes::new().synchronous(true))
            .unwrap();
        device.gen_sources(second, 2).unwrap();
        assert!(device.gen_sources(first, 1).is_err());

        device.destroy_context(second).unwrap();
        assert_eq!(recorder.count(|c| matches!(c, Call::FreeSource(_))), 2);
        assert_eq!(device.gen_sources(first, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_context() {
        let (device, context, _) = open_recording(4);
        let bogus = ContextId(context.raw() + 100);

        assert!(matches!(
            device.make_context_current(Some(bogus)),
            Err(AlError::InvalidName(_))
        ));
        assert!(matches!(
            device.set_listener_position(bogus, Vec3::ONE),
            Err(AlError::InvalidName(_))
        ));
        // Falls back to the current context's register
        assert_eq!(device.get_error(Some(context)), ErrorKind::InvalidName);
    }

    #[test]
    fn test_configure_receives_attributes() {
        let (device, _, recorder) = open_recording(4);
        let attributes = ContextAttributes::from_pairs(&[
            (crate::config::attribute::FREQUENCY, 22050),
            (crate::config::attribute::SYNC, 1),
            (0x7777, 3),
        ])
        .unwrap();

        device.create_context(&attributes).unwrap();
        assert!(recorder.calls().contains(&Call::Configure(attributes)));
    }

    #[test]
    fn test_configure_conflict_creates_no_context() {
        let (device, _, recorder) = open_recording(4);
        recorder.reject_frequency_change();

        let at = |hz| ContextAttributes::new().synchronous(true).with_frequency(hz);
        device.create_context(&at(44100)).unwrap();
        assert!(matches!(
            device.create_context(&at(48000)),
            Err(AlError::InvalidOperation(_))
        ));
        assert_eq!(device.contexts().len(), 2);
    }

    #[test]
    fn test_listener_changes_are_deferred() {
        let (device, context, recorder) = open_recording(4);
        device.process_context(context).unwrap();
        recorder.clear();

        device
            .set_listener_position(context, Vec3::new(1.0, 2.0, 3.0))
            .unwrap();
        device
            .set_distance_model(context, DistanceModel::Linear)
            .unwrap();
        assert_eq!(recorder.count(Call::is_commit), 0);
        assert_eq!(
            device.listener(context).unwrap().position,
            Vec3::new(1.0, 2.0, 3.0)
        );

        let report = device.process_context(context).unwrap();
        assert_eq!(report.contexts, 1);
        let committed: Vec<ListenerState> = recorder
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::CommitContext { listener, .. } => Some(listener),
                _ => None,
            })
            .collect();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].distance_model, DistanceModel::Linear);
    }

    #[test]
    fn test_invalid_listener_values() {
        let (device, context, _) = open_recording(4);
        assert!(matches!(
            device.set_speed_of_sound(context, -1.0),
            Err(AlError::InvalidValue(_))
        ));
        assert!(matches!(
            device.set_doppler_factor(context, f32::NAN),
            Err(AlError::InvalidValue(_))
        ));
        assert_eq!(device.get_error(Some(context)), ErrorKind::InvalidValue);
    }

    #[test]
    fn test_suspended_context_keeps_dirty_state() {
        let (device, context, recorder) = open_recording(4);
        let sources = device.gen_sources(context, 1).unwrap();
        device.process_context(context).unwrap();

        device.suspend_context(context).unwrap();
        assert!(device.is_suspended(context).unwrap());
        device
            .set_source(context, sources[0], crate::SourceParam::Gain(0.3))
            .unwrap();

        let report = device.shared.run_cycle(true).unwrap();
        assert_eq!(report.sources, 0);

        recorder.clear();
        let report = device.process_context(context).unwrap();
        assert!(!device.is_suspended(context).unwrap());
        assert_eq!(report.sources, 1);
        assert_eq!(recorder.source_commits()[0].gain, 0.3);
    }

    #[test]
    fn test_async_context_is_processed_in_background() {
        crate::testing::init_logging();
        let backend = crate::testing::RecordingBackend::new();
        let recorder = backend.recorder();
        let device = crate::testing::registry_of(&[&backend])
            .open_device(
                None,
                crate::DeviceDesc::default().update_interval(Duration::from_millis(2)),
            )
            .unwrap();

        let context = device.create_context(&ContextAttributes::new()).unwrap();
        let sources = device.gen_sources(context, 1).unwrap();
        device
            .set_source(context, sources[0], crate::SourceParam::Pitch(1.5))
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let last_pitch = || recorder.source_commits().last().map(|s| s.pitch);
        while last_pitch() != Some(1.5) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(last_pitch(), Some(1.5));

        device.close();
        assert!(!recorder.used_after_close());
    }

    #[test]
    fn test_slow_configure_does_not_block_setters() {
        let (device, context, recorder) = open_recording(4);
        let sources = device.gen_sources(context, 1).unwrap();
        recorder.set_configure_delay(Duration::from_millis(200));
        recorder.clear();

        std::thread::scope(|scope| {
            let creating = scope.spawn(|| {
                device.create_context(&ContextAttributes::new().synchronous(true))
            });
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while recorder.count(|c| matches!(c, Call::Configure(_))) == 0
                && std::time::Instant::now() < deadline
            {
                std::thread::sleep(Duration::from_millis(1));
            }

            let started = std::time::Instant::now();
            device
                .set_source(context, sources[0], crate::SourceParam::Gain(0.5))
                .unwrap();
            assert!(started.elapsed() < Duration::from_millis(100));

            assert!(creating.join().unwrap().is_ok());
        });
        assert_eq!(device.contexts().len(), 2);
    }
}
