//! The contract every rendering backend implements.
//!
//! A [`Backend`] is a backend *kind* held by the [`DeviceRegistry`]. Opening it
//! against a device name yields a [`BackendDevice`], which the [`Device`](crate::Device)
//! owns until it is closed.
//!
//! # Threading
//!
//! All methods take `&self`; implementations synchronise internally.
//!
//! - `commit_*` calls happen while the device state lock is held. They must be
//!   fast and must not block on I/O.
//! - `upkeep` is called with no engine lock held and may take as long as rendering
//!   takes. Commits for the next cycle may be queued on the application side while
//!   it runs.
//! - Snapshots passed to `commit_*` are only valid for the duration of the call.

mod registry;

pub use registry::DeviceRegistry;

use crate::config::ContextAttributes;
use crate::error::Result;
use crate::format::BufferFormat;
use crate::state::{BufferName, BufferState, ContextId, ListenerState, SourceName, SourceState};

macro_rules! impl_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        ///
        /// Has a single owner and is deliberately neither `Clone` nor `Copy`; it is
        /// handed back to the backend by value when freed.
        #[derive(Debug, PartialEq, Eq, Hash)]
        pub struct $name(u64);

        impl $name {
            pub fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Backend-private key this handle stands for
            pub fn raw(&self) -> u64 {
                self.0
            }
        }
    };
}

impl_handle!(
    /// Backend-private storage of one context.
    ContextImpl
);
impl_handle!(
    /// Backend-private storage of one source.
    SourceImpl
);
impl_handle!(
    /// Backend-private storage of one buffer.
    BufferImpl
);

/// Immutable copy of a dirty source handed to [`BackendDevice::commit_source`].
#[derive(Debug)]
pub struct SourceSnapshot<'a> {
    pub name: SourceName,
    pub context: &'a ContextImpl,
    pub source: &'a SourceImpl,
    pub state: SourceState,
    /// Backend handles of `state.queue`, in the same order
    pub buffers: Vec<&'a BufferImpl>,
}

/// Immutable copy of a dirty buffer handed to [`BackendDevice::commit_buffer`].
#[derive(Debug)]
pub struct BufferSnapshot<'a> {
    pub name: BufferName,
    pub buffer: &'a BufferImpl,
    pub state: BufferState,
}

/// Immutable copy of a dirty listener block handed to [`BackendDevice::commit_context`].
#[derive(Debug)]
pub struct ContextSnapshot<'a> {
    pub id: ContextId,
    pub context: &'a ContextImpl,
    pub listener: ListenerState,
}

/// A backend kind that can be asked to claim device names.
pub trait Backend: Send + Sync {
    /// Short human-readable name of this backend kind
    fn name(&self) -> &str;

    /// Reports every device name this backend would reasonably accept.
    ///
    /// May be called at any time, with or without an open device. Backends that
    /// cannot enumerate (a remote daemon, for example) simply report nothing.
    fn enumerate(&self, report: &mut dyn FnMut(&str));

    /// Claims `device_name` (`None` for the default device).
    ///
    /// Returns `None` immediately if the name does not belong to this backend.
    fn open(&self, device_name: Option<&str>) -> Option<Box<dyn BackendDevice>>;
}

/// An opened backend instance, bound to exactly one [`Device`](crate::Device).
///
/// Every method is only valid between a successful [`Backend::open`] and the
/// matching [`BackendDevice::close`].
pub trait BackendDevice: Send + Sync {
    /// Configures output for a new context. May be called once per context.
    ///
    /// Most attributes are hints. Rejecting a frequency that conflicts with an
    /// already running configuration is allowed (`InvalidOperation`).
    fn configure(&self, attributes: &ContextAttributes) -> Result<()>;

    /// Stops playback and releases everything. Outstanding contexts, sources and
    /// buffers have already been freed by the engine when this is called.
    fn close(&self);

    fn allocate_context(&self) -> Option<ContextImpl>;

    /// Never called on the current context.
    fn free_context(&self, context: ContextImpl);

    /// Sources are finite; return `None` when no more can be allocated.
    fn allocate_source(&self, context: &ContextImpl) -> Option<SourceImpl>;

    /// The slot may be handed out again by a later `allocate_source`, on any context.
    fn free_source(&self, source: SourceImpl);

    /// Buffer names are treated as effectively unlimited.
    fn allocate_buffer(&self) -> Option<BufferImpl>;

    fn free_buffer(&self, buffer: BufferImpl);

    /// Copies (and may convert or resample) `data`. The slice is not retained.
    ///
    /// Called without the device state lock. Re-uploading a buffer that is in use
    /// must not disturb playback before the next `commit_buffer` of that buffer.
    fn upload_buffer(
        &self,
        buffer: &BufferImpl,
        format: BufferFormat,
        data: &[u8],
        frequency: u32,
    ) -> Result<()>;

    fn commit_source(&self, source: &SourceSnapshot<'_>);

    fn commit_buffer(&self, buffer: &BufferSnapshot<'_>);

    fn commit_context(&self, context: &ContextSnapshot<'_>);

    /// Rendering and general maintenance. May be a no-op for backends that
    /// render on their own threads. Called at an irregular rate.
    fn upkeep(&self);
}
