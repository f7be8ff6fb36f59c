pub mod descriptor_mutex;

pub use descriptor_mutex::{DescriptorGuard, DescriptorMutex};
