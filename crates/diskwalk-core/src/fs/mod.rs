/// File system detection and module organization
use anyhow::Result;

pub mod btrfs;
pub mod common;
pub mod exfat;
pub mod xfs;

use crate::backend::{Directory, FileSystem, FsFile};
use common::DeviceRegion;

/// Detect and open the file system at the start of `region`
pub fn open_filesystem(region: DeviceRegion) -> Result<Box<dyn FileSystem>> {
    // Check for XFS (superblock at sector 0)
    if let Ok(sector0) = region.read_sector(0) {
        if xfs::is_xfs_superblock(sector0) {
            return Ok(Box::new(xfs::detect(&region)?));
        }
    }

    // Check for Btrfs (superblock at 64KB)
    if let Ok(btrfs_sb) = region.read_bytes(btrfs::SUPERBLOCK_OFFSET, 4096) {
        if btrfs::is_btrfs_superblock(btrfs_sb) {
            return Ok(Box::new(btrfs::detect(&region)?));
        }
    }

    // Check for exFAT (boot sector at sector 0)
    if let Ok(sector0) = region.read_sector(0) {
        if exfat::is_exfat_boot_sector(sector0) {
            return Ok(Box::new(exfat::ExFatFileSystem::open(region)?));
        }
    }

    anyhow::bail!(
        "No supported file system at offset 0x{:x}",
        region.offset()
    )
}

/// A file system recognised from its superblock only
///
/// Geometry is reported; directory and file access is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedFileSystem {
    pub type_name: &'static str,
    pub flags: u32,
    pub offset: u64,
    pub block_size: u64,
    pub block_count: u64,
    pub inode_count: u64,
    pub root_inode: u64,
}

impl FileSystem for DetectedFileSystem {
    fn type_name(&self) -> &str {
        self.type_name
    }

    fn flags(&self) -> u32 {
        self.flags
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn block_size(&self) -> u64 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn inode_count(&self) -> u64 {
        self.inode_count
    }

    fn root_inode(&self) -> u64 {
        self.root_inode
    }

    fn open_dir(&self, inode: u64) -> Result<Box<dyn Directory + '_>> {
        anyhow::bail!("{}: directory access is unsupported (inode {})", self.type_name, inode)
    }

    fn open_inode(&self, inode: u64) -> Result<FsFile> {
        anyhow::bail!("{}: inode access is unsupported (inode {})", self.type_name, inode)
    }

    fn open_path(&self, path: &str) -> Result<FsFile> {
        anyhow::bail!("{}: path lookup is unsupported ({})", self.type_name, path)
    }
}
