//! DOS (MBR) partition table
//!
//! Descriptors are laid out the way forensic tools list them: the table
//! itself as a meta entry, then primary partitions in start order with
//! unallocated gaps filled in between and after them.

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use std::sync::Arc;

use crate::backend::{FileSystem, Partition, PartitionFlags, Volume};
use crate::fs::common::{BlockDevice, DeviceRegion, SECTOR_SIZE};

/// Boot signature at bytes 510-511
const MBR_SIGNATURE: [u8; 2] = [0x55, 0xAA];

const TABLE_OFFSET: usize = 446;
const ENTRY_SIZE: usize = 16;
const PRIMARY_SLOTS: usize = 4;

/// One slot of the primary table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbrEntry {
    pub status: u8,
    pub partition_type: u8,
    pub start_lba: u32,
    pub sector_count: u32,
}

impl MbrEntry {
    fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let status = cursor.read_u8()?;
        cursor.set_position(4);
        let partition_type = cursor.read_u8()?;
        cursor.set_position(8);
        let start_lba = cursor.read_u32::<LittleEndian>()?;
        let sector_count = cursor.read_u32::<LittleEndian>()?;

        Ok(MbrEntry {
            status,
            partition_type,
            start_lba,
            sector_count,
        })
    }

    pub fn is_used(&self) -> bool {
        self.partition_type != 0 && self.sector_count != 0
    }

    pub fn is_extended(&self) -> bool {
        matches!(self.partition_type, 0x05 | 0x0F | 0x85)
    }

    fn end(&self) -> u64 {
        u64::from(self.start_lba) + u64::from(self.sector_count)
    }
}

/// Parse the four primary slots of a boot sector
pub fn parse_table(sector0: &[u8]) -> Result<Vec<MbrEntry>> {
    if sector0.len() < SECTOR_SIZE as usize {
        anyhow::bail!("Insufficient data for an MBR");
    }
    if sector0[510..512] != MBR_SIGNATURE {
        anyhow::bail!("Missing MBR boot signature");
    }
    // A volume boot record carries the same signature
    if &sector0[3..11] == b"EXFAT   " || &sector0[3..11] == b"NTFS    " {
        anyhow::bail!("Sector 0 is a volume boot record, not an MBR");
    }

    let mut entries = Vec::with_capacity(PRIMARY_SLOTS);
    for slot in 0..PRIMARY_SLOTS {
        let start = TABLE_OFFSET + slot * ENTRY_SIZE;
        let entry = MbrEntry::parse(&sector0[start..start + ENTRY_SIZE])?;
        if entry.status != 0x00 && entry.status != 0x80 {
            anyhow::bail!("Bad status 0x{:02x} in MBR slot {}", entry.status, slot);
        }
        entries.push(entry);
    }

    if !entries.iter().any(MbrEntry::is_used) {
        anyhow::bail!("MBR has no partitions");
    }
    Ok(entries)
}

/// Human-readable name of an MBR partition type
pub fn type_label(partition_type: u8) -> &'static str {
    match partition_type {
        0x01 => "DOS FAT12",
        0x04 => "DOS FAT16 (<32MB)",
        0x05 => "DOS Extended",
        0x06 => "DOS FAT16",
        0x07 => "exFAT/NTFS",
        0x0B => "Win95 FAT32",
        0x0C => "Win95 FAT32 (LBA)",
        0x0E => "Win95 FAT16 (LBA)",
        0x0F => "Win95 Extended (LBA)",
        0x82 => "Linux Swap",
        0x83 => "Linux",
        0x85 => "Linux Extended",
        0x8E => "Linux LVM",
        0xA5 => "FreeBSD",
        0xAF => "Mac OS X HFS",
        0xEE => "GPT Safety Partition",
        0xEF => "EFI System Partition",
        0xFD => "Linux RAID",
        _ => "Unknown Type",
    }
}

/// Build the listed descriptors for a table on a device of `device_sectors`
pub fn layout(entries: &[MbrEntry], device_sectors: u64) -> Vec<Partition> {
    let mut parts = vec![Partition {
        address: 0,
        label: Some("Primary Table (#0)".to_string()),
        start: 0,
        length: 1,
        flags: PartitionFlags::META,
    }];

    let mut used: Vec<&MbrEntry> = entries.iter().filter(|e| e.is_used()).collect();
    used.sort_by_key(|e| (e.start_lba, e.sector_count));

    let mut cursor = 0u64;
    for entry in used {
        let start = u64::from(entry.start_lba);
        if start > cursor {
            parts.push(unallocated(cursor, start - cursor));
        }

        let flags = if entry.is_extended() {
            PartitionFlags::META
        } else {
            PartitionFlags::ALLOCATED
        };
        parts.push(Partition {
            address: 0,
            label: Some(format!(
                "{} (0x{:02x})",
                type_label(entry.partition_type),
                entry.partition_type
            )),
            start,
            length: u64::from(entry.sector_count),
            flags,
        });
        cursor = cursor.max(entry.end());
    }

    if device_sectors > cursor {
        parts.push(unallocated(cursor, device_sectors - cursor));
    }

    for (address, part) in parts.iter_mut().enumerate() {
        part.address = address as u64;
    }
    parts
}

fn unallocated(start: u64, length: u64) -> Partition {
    Partition {
        address: 0,
        label: Some("Unallocated".to_string()),
        start,
        length,
        flags: PartitionFlags::UNALLOCATED,
    }
}

/// A DOS partition table on a raw image
pub struct DosVolume {
    device: Arc<BlockDevice>,
    partitions: Vec<Partition>,
}

impl DosVolume {
    pub fn open(device: Arc<BlockDevice>) -> Result<Self> {
        let entries = parse_table(device.read_sector(0)?)?;
        let partitions = layout(&entries, device.size() / SECTOR_SIZE);

        tracing::debug!(
            "DOS partition table: {} descriptors over {} sectors",
            partitions.len(),
            device.size() / SECTOR_SIZE
        );

        Ok(DosVolume { device, partitions })
    }
}

impl Volume for DosVolume {
    fn block_size(&self) -> u64 {
        SECTOR_SIZE
    }

    fn partition_count(&self) -> u64 {
        self.partitions.len() as u64
    }

    fn partition(&self, index: u64) -> Option<Partition> {
        let index = usize::try_from(index).ok()?;
        self.partitions.get(index).cloned()
    }

    fn open_filesystem(&self, partition: &Partition) -> Result<Box<dyn FileSystem + '_>> {
        let offset = partition
            .start
            .checked_mul(SECTOR_SIZE)
            .ok_or_else(|| anyhow::anyhow!("Partition start {} out of range", partition.start))?;
        let len = partition
            .length
            .checked_mul(SECTOR_SIZE)
            .ok_or_else(|| anyhow::anyhow!("Partition length {} out of range", partition.length))?;

        let region = DeviceRegion::new(self.device.clone(), offset, len);
        crate::fs::open_filesystem(region)
    }
}
