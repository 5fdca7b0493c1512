//! # alcore
//!
//! Device, context and resource core of a 3D audio library.
//!
//! Applications open a [`Device`] through a [`DeviceRegistry`], create one or more
//! contexts on it, and manipulate sources, buffers and a per-context listener.
//! None of those changes reach the rendering backend directly: they only mark
//! objects dirty. A processing cycle later commits everything that changed in one
//! consistent batch (buffers, then sources, then listeners) and lets the backend
//! render.
//!
//! ## Quick Start
//!
//! ```no_run
//! use alcore::*;
//!
//! let device = DeviceRegistry::global().open_device(None, DeviceDesc::default())?;
//! let context = device.create_context(&ContextAttributes::new())?;
//! device.make_context_current(Some(context))?;
//!
//! let buffer = device.gen_buffers(1)?[0];
//! let pcm: Vec<u8> = vec![128; 22050];
//! device.buffer_data(buffer, BufferFormat::Mono8, &pcm, 22050)?;
//!
//! let source = device.gen_sources(context, 1)?[0];
//! device.set_source_buffer(context, source, Some(buffer))?;
//! device.set_source(context, source, SourceParam::Position(Vec3::new(2.0, 0.0, 0.0)))?;
//! device.play_source(context, source)?;
//!
//! // Moving the listener is picked up by the next background cycle
//! device.set_listener_position(context, Vec3::new(0.0, 0.0, 1.0))?;
//! # Ok::<(), AlError>(())
//! ```
//!
//! ## Threading
//!
//! A [`Device`] is `Send + Sync`; every operation may be called from any thread.
//! Asynchronous contexts are processed by one background thread per device at the
//! configured update rate. Synchronous contexts are only processed when the
//! application calls [`Device::process_context`].
//!
//! ## Backends
//!
//! - **[`SoftwareMixer`]** over the system output (feature `system-output`, via cpal)
//! - **[`SoftwareMixer`]** over [`mixer::NullDriver`], a wall-clock paced null output
//!
//! Custom backends implement [`backend::Backend`] and [`backend::BackendDevice`].

pub mod backend;
pub mod config;
mod device;
pub mod engine;
pub mod error;
pub mod format;
pub mod math;
pub mod mixer;
pub mod state;

#[cfg(test)]
mod testing;

pub use backend::DeviceRegistry;
pub use config::{ContextAttributes, DeviceDesc};
pub use device::Device;
pub use engine::CycleReport;
pub use error::{AlError, ErrorKind, Result};
pub use format::BufferFormat;
pub use math::{Orientation, Vec3};
pub use mixer::{MixerDesc, SoftwareMixer};
pub use state::{
    BufferName, BufferState, ContextId, DistanceModel, ListenerParam, ListenerState, PlayState,
    SourceName, SourceParam, SourceState,
};
