/// Common types and utilities for image access
use anyhow::Result;
use memmap2::MmapOptions;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

/// Sector size assumed for partition tables and boot records
pub const SECTOR_SIZE: u64 = 512;

enum Backing {
    Mapped { _file: File, mmap: memmap2::Mmap },
    Owned(Vec<u8>),
}

/// A read-only image: a memory-mapped file or an in-memory buffer
pub struct BlockDevice {
    backing: Backing,
    size: u64,
}

impl BlockDevice {
    /// Open a block device or image file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path.as_ref())?;
        let size = device_size(&mut file)?;
        let len = usize::try_from(size)
            .map_err(|_| anyhow::anyhow!("Device too large to map: {} bytes", size))?;

        let mmap = unsafe { MmapOptions::new().len(len).map(&file)? };

        Ok(BlockDevice {
            backing: Backing::Mapped { _file: file, mmap },
            size,
        })
    }

    /// Wrap an image already held in memory
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        BlockDevice {
            backing: Backing::Owned(data),
            size,
        }
    }

    /// Get the size of the device in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    fn as_slice(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped { mmap, .. } => &mmap[..],
            Backing::Owned(data) => data.as_slice(),
        }
    }

    /// Read a slice of bytes from the device
    pub fn read_bytes(&self, offset: u64, length: usize) -> Result<&[u8]> {
        let data = self.as_slice();
        let end = offset.checked_add(length as u64);

        match end {
            Some(end) if end <= data.len() as u64 => Ok(&data[offset as usize..end as usize]),
            _ => anyhow::bail!(
                "Read beyond end of device: offset {} + {} > {}",
                offset,
                length,
                data.len()
            ),
        }
    }

    /// Read a single sector (512 bytes)
    pub fn read_sector(&self, sector: u64) -> Result<&[u8]> {
        let offset = sector
            .checked_mul(SECTOR_SIZE)
            .ok_or_else(|| anyhow::anyhow!("Sector {} out of range", sector))?;
        self.read_bytes(offset, SECTOR_SIZE as usize)
    }
}

/// Size of an open file or block device in bytes
///
/// Block device nodes report a zero metadata length, so the size is taken
/// from the end offset instead.
fn device_size(file: &mut File) -> Result<u64> {
    let size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;
    Ok(size)
}

/// A bounded window onto a shared device, e.g. one partition
#[derive(Clone)]
pub struct DeviceRegion {
    device: Arc<BlockDevice>,
    offset: u64,
    len: u64,
}

impl DeviceRegion {
    pub fn new(device: Arc<BlockDevice>, offset: u64, len: u64) -> Self {
        Self {
            device,
            offset,
            len,
        }
    }

    /// Region covering the whole device
    pub fn whole(device: Arc<BlockDevice>) -> Self {
        let len = device.size();
        Self::new(device, 0, len)
    }

    /// Byte offset of the region within the device
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read bytes relative to the start of the region
    pub fn read_bytes(&self, offset: u64, length: usize) -> Result<&[u8]> {
        match offset.checked_add(length as u64) {
            Some(end) if end <= self.len => {}
            _ => anyhow::bail!(
                "Read beyond end of region: offset {} + {} > {}",
                offset,
                length,
                self.len
            ),
        }
        let absolute = self
            .offset
            .checked_add(offset)
            .ok_or_else(|| anyhow::anyhow!("Region offset overflow"))?;
        self.device.read_bytes(absolute, length)
    }

    /// Read a single sector relative to the start of the region
    pub fn read_sector(&self, sector: u64) -> Result<&[u8]> {
        let offset = sector
            .checked_mul(SECTOR_SIZE)
            .ok_or_else(|| anyhow::anyhow!("Sector {} out of range", sector))?;
        self.read_bytes(offset, SECTOR_SIZE as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_bounds() {
        let device = BlockDevice::from_bytes(vec![7u8; 1024]);
        assert_eq!(device.size(), 1024);
        assert_eq!(device.read_sector(1).unwrap().len(), 512);
        assert!(device.read_sector(2).is_err());
        assert!(device.read_bytes(u64::MAX, 2).is_err());
    }

    #[test]
    fn test_region_is_bounded() {
        let mut data = vec![0u8; 2048];
        data[512] = 0xAB;
        let device = Arc::new(BlockDevice::from_bytes(data));

        let region = DeviceRegion::new(device.clone(), 512, 512);
        assert_eq!(region.read_bytes(0, 1).unwrap(), &[0xAB]);
        assert!(region.read_bytes(256, 512).is_err());
        assert!(region.read_sector(1).is_err());

        let whole = DeviceRegion::whole(device);
        assert_eq!(whole.len(), 2048);
    }

    #[test]
    fn test_region_past_device_end() {
        // A partition table may claim more sectors than the image holds
        let device = Arc::new(BlockDevice::from_bytes(vec![0u8; 1024]));
        let region = DeviceRegion::new(device, 512, 4096);
        assert!(region.read_sector(0).is_ok());
        assert!(region.read_sector(1).is_err());
    }

    #[test]
    fn test_size_from_end_offset() {
        use std::io::{Read, Write};

        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[0x5Au8; 1536]).unwrap();

        assert_eq!(device_size(&mut file).unwrap(), 1536);
        // Position is rewound for later readers
        let mut first = [0u8; 1];
        file.read_exact(&mut first).unwrap();
        assert_eq!(first, [0x5A]);
    }

    #[test]
    fn test_open_maps_full_length() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 1024]).unwrap();
        file.write_all(&[0xC3u8; 512]).unwrap();
        file.flush().unwrap();

        let device = BlockDevice::open(file.path()).unwrap();
        assert_eq!(device.size(), 1536);
        assert_eq!(device.read_sector(2).unwrap()[0], 0xC3);
        assert!(device.read_sector(3).is_err());
    }
}
