//! Image, volume and filesystem access boundary
//!
//! The walker never touches on-disk bytes itself. Everything it needs is
//! reached through the traits in this module:
//!
//! - [`ForensicBackend`] opens a device path as an [`Image`]
//! - [`Image`] opens the [`Volume`] (partition table) layered on it
//! - [`Volume`] enumerates [`Partition`] descriptors and opens a [`FileSystem`]
//! - [`FileSystem`] opens [`Directory`] handles and resolves [`FsFile`]s
//!
//! Handles are owned values; dropping one releases whatever the backend
//! holds for it.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod memory;
pub mod raw;

pub use memory::{MemoryBackend, MemoryFileSystem, MemoryImage, MemoryVolume};
pub use raw::RawBackend;

bitflags::bitflags! {
    /// Partition descriptor flags
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PartitionFlags: u32 {
        const ALLOCATED = 0x01;
        const UNALLOCATED = 0x02;
        const META = 0x04;
    }
}

/// A contiguous region of a volume, as described by the partition table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Ordinal index within the volume
    pub address: u64,
    /// Human-readable description, e.g. "Linux (0x83)"
    pub label: Option<String>,
    /// Start, in volume blocks
    pub start: u64,
    /// Length, in volume blocks
    pub length: u64,
    pub flags: PartitionFlags,
}

/// Metadata type code
///
/// Codes follow the usual forensic numbering; anything outside the named
/// constants is carried through untouched and reported as "unknown".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetaType(pub u8);

impl MetaType {
    pub const UNDEFINED: Self = Self(0);
    pub const REGULAR: Self = Self(1);
    pub const DIRECTORY: Self = Self(2);
    pub const FIFO: Self = Self(3);
    pub const CHARACTER: Self = Self(4);
    pub const BLOCK: Self = Self(5);
    pub const SYMLINK: Self = Self(6);
    pub const SOCKET: Self = Self(8);
}

/// Metadata block of a file or directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// Inode (metadata) address
    pub address: u64,
    pub uid: u32,
    pub gid: u32,
    /// Permission bits
    pub mode: u32,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    /// Creation time
    pub crtime: i64,
    pub nlink: u32,
    pub meta_type: MetaType,
    /// Names attached to this metadata; slot 0 is the primary one
    pub names: Vec<String>,
}

/// A file as yielded by a directory or a direct lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsFile {
    /// Directory entry name; absent for synthetic entries
    pub name: Option<String>,
    /// Absent when the metadata could not be read
    pub meta: Option<FileMeta>,
    /// Block size of the owning filesystem, when known
    pub block_size: Option<u64>,
}

/// Entry point of a forensic access library
pub trait ForensicBackend {
    fn open_image(&self, path: &Path) -> Result<Box<dyn Image>>;
}

/// An opened image
pub trait Image {
    /// Detect and open the volume system (partition table) on this image
    fn open_volume(&self) -> Result<Box<dyn Volume>>;
}

/// A partition-table view of an image
pub trait Volume {
    /// Size in bytes of the units `Partition::start` and `length` count in
    fn block_size(&self) -> u64;

    fn partition_count(&self) -> u64;

    /// Descriptor at `index`; `None` for sparse or invalid slots
    fn partition(&self, index: u64) -> Option<Partition>;

    /// Detect and open the filesystem inside `partition`
    fn open_filesystem(&self, partition: &Partition) -> Result<Box<dyn FileSystem + '_>>;
}

/// An opened filesystem
pub trait FileSystem {
    /// Short type name, e.g. "exfat"
    fn type_name(&self) -> &str;
    fn flags(&self) -> u32;
    /// Byte offset of the filesystem within the image
    fn offset(&self) -> u64;
    fn block_size(&self) -> u64;
    fn block_count(&self) -> u64;
    fn inode_count(&self) -> u64;
    fn root_inode(&self) -> u64;

    fn open_dir(&self, inode: u64) -> Result<Box<dyn Directory + '_>>;
    fn open_inode(&self, inode: u64) -> Result<FsFile>;
    fn open_path(&self, path: &str) -> Result<FsFile>;
}

impl<T: FileSystem + ?Sized> FileSystem for &T {
    fn type_name(&self) -> &str {
        (**self).type_name()
    }

    fn flags(&self) -> u32 {
        (**self).flags()
    }

    fn offset(&self) -> u64 {
        (**self).offset()
    }

    fn block_size(&self) -> u64 {
        (**self).block_size()
    }

    fn block_count(&self) -> u64 {
        (**self).block_count()
    }

    fn inode_count(&self) -> u64 {
        (**self).inode_count()
    }

    fn root_inode(&self) -> u64 {
        (**self).root_inode()
    }

    fn open_dir(&self, inode: u64) -> Result<Box<dyn Directory + '_>> {
        (**self).open_dir(inode)
    }

    fn open_inode(&self, inode: u64) -> Result<FsFile> {
        (**self).open_inode(inode)
    }

    fn open_path(&self, path: &str) -> Result<FsFile> {
        (**self).open_path(path)
    }
}

/// An opened directory, iterated by index in native order
pub trait Directory {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry at `index`; `None` when the entry cannot be loaded
    fn entry(&self, index: usize) -> Option<FsFile>;
}
