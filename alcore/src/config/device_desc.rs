use std::time::Duration;

/// Configuration descriptor for an opened device
#[derive(Debug, Clone)]
pub struct DeviceDesc {
    /// Ceiling on simultaneously allocated sources across all contexts of the device.
    /// Allocation past this count fails with `OutOfMemory` without asking the backend.
    pub max_sources: usize,
    /// Period of the processing thread that drives asynchronous contexts
    pub update_interval: Duration,
}

impl Default for DeviceDesc {
    fn default() -> Self {
        Self {
            max_sources: 64,
            update_interval: Duration::from_millis(10),
        }
    }
}

impl DeviceDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_sources(mut self, max: usize) -> Self {
        self.max_sources = max;
        self
    }

    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }
}
