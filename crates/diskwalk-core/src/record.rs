//! Output records
//!
//! Records are plain values: once built they hold no reference to the image,
//! volume or filesystem they were read from.

use serde::{Deserialize, Serialize};

/// Inode count reported when a partition holds no recognizable filesystem
pub const UNKNOWN_INODES: i64 = -1;

/// One row of the partition listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRecord {
    pub device: String,
    pub partition: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub partition_type: String,
    pub flags: u32,
    pub offset: u64,
    pub blocks_size: u64,
    pub blocks: u64,
    pub inodes: i64,
}

/// One row of the file listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub device: String,
    pub partition: String,
    pub path: String,
    pub filename: String,
    pub block_size: Option<u64>,
    pub inode: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mode: Option<String>,
    pub size: Option<u64>,
    pub atime: Option<i64>,
    pub mtime: Option<i64>,
    pub ctime: Option<i64>,
    pub hard_links: Option<u32>,
    #[serde(rename = "type")]
    pub file_type: Option<String>,
}
