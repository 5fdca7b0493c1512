use crate::backend::Backend;
use crate::config::DeviceDesc;
use crate::device::Device;
use crate::error::{AlError, Result};
use crate::mixer::{MixerDesc, NullDriver, SoftwareMixer};
use std::sync::{Arc, OnceLock};

/// Ordered table of backend kinds that device names are offered to.
///
/// The table is fixed at construction; nothing can be registered once a
/// registry exists, so it never changes under an open device.
pub struct DeviceRegistry {
    backends: Vec<Arc<dyn Backend>>,
}

impl DeviceRegistry {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self { backends }
    }

    /// Process-wide registry, built on first use.
    ///
    /// Tries the software mixer over the system output first, then the null output,
    /// which also takes the default device when no system output claims it.
    pub fn global() -> &'static DeviceRegistry {
        static GLOBAL: OnceLock<DeviceRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            #[allow(unused_mut)]
            let mut backends: Vec<Arc<dyn Backend>> = Vec::new();

            #[cfg(feature = "system-output")]
            backends.push(Arc::new(SoftwareMixer::new(
                crate::mixer::CpalDriver,
                MixerDesc::default(),
            )));

            backends.push(Arc::new(SoftwareMixer::new(
                NullDriver::new().as_default(),
                MixerDesc::default(),
            )));

            log::debug!("Built global device registry with {} backends", backends.len());
            Self::new(backends)
        })
    }

    /// Names of the registered backend kinds, in the order they are asked to claim a device.
    pub fn backends(&self) -> Vec<&str> {
        self.backends.iter().map(|backend| backend.name()).collect()
    }

    /// Asks every backend to report the device names it would accept.
    pub fn enumerate<F>(&self, mut callback: F)
    where
        F: FnMut(&str),
    {
        for backend in &self.backends {
            backend.enumerate(&mut callback);
        }
    }

    pub fn device_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.enumerate(|name| names.push(name.to_string()));
        names
    }

    /// Opens `device_name` on the first backend that claims it.
    ///
    /// `None` and `"default"` both request the default device.
    pub fn open_device(&self, device_name: Option<&str>, desc: DeviceDesc) -> Result<Device> {
        let requested = device_name.filter(|name| !name.eq_ignore_ascii_case("default"));

        for backend in &self.backends {
            match backend.open(requested) {
                Some(opened) => {
                    log::info!(
                        "Backend '{}' claimed device {:?}",
                        backend.name(),
                        requested.unwrap_or("default")
                    );
                    let name = requested.unwrap_or("default").to_string();
                    return Ok(Device::new(name, backend.name().to_string(), opened, desc));
                }
                None => {
                    log::debug!(
                        "Backend '{}' declined device {:?}",
                        backend.name(),
                        requested.unwrap_or("default")
                    );
                }
            }
        }

        Err(AlError::DeviceUnavailable(format!(
            "No backend claimed device {:?}",
            requested.unwrap_or("default")
        )))
    }
}
