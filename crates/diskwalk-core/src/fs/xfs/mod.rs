/// XFS file system detection
use anyhow::Result;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

use super::common::DeviceRegion;
use super::DetectedFileSystem;

/// XFS magic number in superblock
const XFS_MAGIC: u32 = 0x58465342; // "XFSB"

/// XFS superblock structure (simplified)
#[derive(Debug)]
pub struct XfsSuperblock {
    pub block_size: u32,
    pub data_blocks: u64,
    pub root_inode: u64,
    /// Allocated inodes
    pub inode_count: u64,
}

impl XfsSuperblock {
    /// Parse XFS superblock from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 512 {
            anyhow::bail!("Insufficient data for XFS superblock");
        }

        let mut cursor = Cursor::new(data);

        let magic = cursor.read_u32::<BigEndian>()?;
        if magic != XFS_MAGIC {
            anyhow::bail!("Invalid XFS magic number: 0x{:08X}", magic);
        }

        let block_size = cursor.read_u32::<BigEndian>()?;
        if !block_size.is_power_of_two() || !(512..=65536).contains(&block_size) {
            anyhow::bail!("Invalid XFS block size {}", block_size);
        }
        let data_blocks = cursor.read_u64::<BigEndian>()?;

        cursor.set_position(56);
        let root_inode = cursor.read_u64::<BigEndian>()?;

        cursor.set_position(128);
        let inode_count = cursor.read_u64::<BigEndian>()?;

        Ok(XfsSuperblock {
            block_size,
            data_blocks,
            root_inode,
            inode_count,
        })
    }
}

/// Check if data contains XFS superblock signature
pub fn is_xfs_superblock(data: &[u8]) -> bool {
    let mut cursor = Cursor::new(data);
    matches!(cursor.read_u32::<BigEndian>(), Ok(XFS_MAGIC))
}

/// Geometry of the XFS volume at the start of `region`
pub fn detect(region: &DeviceRegion) -> Result<DetectedFileSystem> {
    let superblock = XfsSuperblock::parse(region.read_sector(0)?)?;

    Ok(DetectedFileSystem {
        type_name: "xfs",
        flags: 0,
        offset: region.offset(),
        block_size: u64::from(superblock.block_size),
        block_count: superblock.data_blocks,
        inode_count: superblock.inode_count,
        root_inode: superblock.root_inode,
    })
}
