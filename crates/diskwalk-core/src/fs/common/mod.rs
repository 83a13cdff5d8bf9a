//! Shared device access types

mod types;

pub use types::{BlockDevice, DeviceRegion, SECTOR_SIZE};
