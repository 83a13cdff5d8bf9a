/// Btrfs file system detection
use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::common::DeviceRegion;
use super::DetectedFileSystem;

/// Btrfs magic number
const BTRFS_MAGIC: &[u8; 8] = b"_BHRfS_M";

/// Primary superblock location
pub const SUPERBLOCK_OFFSET: u64 = 0x10000;

/// Object id of the top-level subvolume's root directory
const FIRST_FREE_OBJECTID: u64 = 256;

/// Btrfs superblock structure (simplified)
#[derive(Debug)]
pub struct BtrfsSuperblock {
    pub flags: u64,
    pub generation: u64,
    pub total_bytes: u64,
    pub bytes_used: u64,
    pub num_devices: u64,
    pub sectorsize: u32,
    pub nodesize: u32,
}

impl BtrfsSuperblock {
    /// Parse Btrfs superblock from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 1024 {
            anyhow::bail!("Insufficient data for Btrfs superblock");
        }
        if !is_btrfs_superblock(data) {
            anyhow::bail!("Invalid Btrfs magic");
        }

        let mut cursor = Cursor::new(data);

        // Skip checksum, fsid and bytenr
        cursor.set_position(56);
        let flags = cursor.read_u64::<LittleEndian>()?;

        cursor.set_position(72);
        let generation = cursor.read_u64::<LittleEndian>()?;

        cursor.set_position(112);
        let total_bytes = cursor.read_u64::<LittleEndian>()?;
        let bytes_used = cursor.read_u64::<LittleEndian>()?;
        let _root_dir_objectid = cursor.read_u64::<LittleEndian>()?;
        let num_devices = cursor.read_u64::<LittleEndian>()?;
        let sectorsize = cursor.read_u32::<LittleEndian>()?;
        let nodesize = cursor.read_u32::<LittleEndian>()?;

        if !sectorsize.is_power_of_two() || sectorsize < 512 {
            anyhow::bail!("Invalid Btrfs sector size {}", sectorsize);
        }

        Ok(BtrfsSuperblock {
            flags,
            generation,
            total_bytes,
            bytes_used,
            num_devices,
            sectorsize,
            nodesize,
        })
    }
}

/// Check if data contains Btrfs superblock signature
pub fn is_btrfs_superblock(data: &[u8]) -> bool {
    if data.len() < 72 {
        return false;
    }

    // Btrfs magic is at offset 64
    &data[64..72] == BTRFS_MAGIC
}

/// Geometry of the Btrfs volume in `region`
pub fn detect(region: &DeviceRegion) -> Result<DetectedFileSystem> {
    let superblock = BtrfsSuperblock::parse(region.read_bytes(SUPERBLOCK_OFFSET, 4096)?)?;

    tracing::debug!(
        "Btrfs at 0x{:x}: generation {}, {} of {} bytes used on {} devices",
        region.offset(),
        superblock.generation,
        superblock.bytes_used,
        superblock.total_bytes,
        superblock.num_devices
    );

    Ok(DetectedFileSystem {
        type_name: "btrfs",
        flags: (superblock.flags & u64::from(u32::MAX)) as u32,
        offset: region.offset(),
        block_size: u64::from(superblock.sectorsize),
        block_count: superblock.total_bytes / u64::from(superblock.sectorsize),
        // Inodes are allocated dynamically; there is no fixed count
        inode_count: 0,
        root_inode: FIRST_FREE_OBJECTID,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::common::BlockDevice;
    use byteorder::{ByteOrder, LittleEndian};
    use std::sync::Arc;

    #[test]
    fn test_btrfs_magic_detection() {
        let mut test_data = vec![0u8; 72];
        test_data[64..72].copy_from_slice(BTRFS_MAGIC);
        assert!(is_btrfs_superblock(&test_data));

        let wrong_magic = vec![0u8; 72];
        assert!(!is_btrfs_superblock(&wrong_magic));
    }

    #[test]
    fn test_detect_geometry() {
        let mut image = vec![0u8; 0x10000 + 4096];
        let sb = &mut image[0x10000..];
        sb[64..72].copy_from_slice(BTRFS_MAGIC);
        LittleEndian::write_u64(&mut sb[112..], 1 << 30);
        LittleEndian::write_u64(&mut sb[136..], 1);
        LittleEndian::write_u32(&mut sb[144..], 4096);
        LittleEndian::write_u32(&mut sb[148..], 16384);

        let region = DeviceRegion::whole(Arc::new(BlockDevice::from_bytes(image)));
        let fs = detect(&region).unwrap();
        assert_eq!(fs.type_name, "btrfs");
        assert_eq!(fs.block_size, 4096);
        assert_eq!(fs.block_count, (1 << 30) / 4096);
        assert_eq!(fs.root_inode, 256);
        assert_eq!(fs.inode_count, 0);
    }
}
