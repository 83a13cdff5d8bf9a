//! Partition and file listings for forensic disk images
//!
//! A backend opens device paths as images; each query walks them through
//! [`accessor::DeviceAccessor`] and produces detached records.

pub mod accessor;
pub mod backend;
pub mod config;
pub mod error;
pub mod fs;
pub mod lookup;
pub mod mapper;
pub mod partitions;
pub mod query;
pub mod record;
pub mod volume;
pub mod walker;

// Re-export the query surface
pub use backend::{ForensicBackend, MemoryBackend, RawBackend};
pub use config::WalkConfig;
pub use error::QueryError;
pub use query::{list_files, list_partitions, FileQuery, PartitionQuery};
pub use record::{FileRecord, PartitionRecord};
pub use walker::{TreeWalker, WalkStats};
