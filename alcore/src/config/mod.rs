mod context_attributes;
mod device_desc;

pub use context_attributes::{ContextAttributes, attribute};
pub use device_desc::DeviceDesc;
