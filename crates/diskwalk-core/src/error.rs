//! Query-level diagnostics
//!
//! None of these cross the query boundary: each is logged where it occurs and
//! the query degrades to fewer records.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// A file listing was requested without any device
    #[error("device files require at least one device")]
    NoDevices,

    /// A file listing needs exactly one partition address
    #[error("device files require a single partition, got {count}")]
    PartitionFilter { count: usize },

    /// The device path could not be opened as an image
    #[error("failed to open image '{device}': {reason}")]
    ImageOpen { device: String, reason: String },

    /// The image opened but no volume system was detected
    #[error("failed to open volume on '{device}': {reason}")]
    VolumeOpen { device: String, reason: String },
}
