/// exFAT file system support
use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use chrono::NaiveDate;
use std::io::Cursor;

use super::common::DeviceRegion;
use crate::backend::{Directory, FileMeta, FileSystem, FsFile, MetaType};

pub mod directory;
pub mod fat;

use directory::{FileEntrySet, ENTRY_SIZE, ENTRY_TYPE_END, ENTRY_TYPE_FILE};
use fat::FatTable;

/// exFAT file system signature
const EXFAT_SIGNATURE: &[u8; 8] = b"EXFAT   ";

/// Synthetic inode of the root directory, which has no entry set
pub const ROOT_INODE: u64 = 2;

/// Directory contents read beyond this are ignored
const MAX_DIRECTORY_BYTES: u64 = 256 * 1024 * 1024;

/// exFAT boot sector structure (simplified)
#[derive(Debug)]
pub struct ExFatBootSector {
    pub volume_length: u64,
    pub fat_offset: u32,
    pub fat_length: u32,
    pub cluster_heap_offset: u32,
    pub cluster_count: u32,
    pub first_cluster_of_root_directory: u32,
    pub volume_serial_number: u32,
    pub file_system_revision: u16,
    pub volume_flags: u16,
    pub bytes_per_sector_shift: u8,
    pub sectors_per_cluster_shift: u8,
    pub number_of_fats: u8,
}

impl ExFatBootSector {
    /// Parse exFAT boot sector from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 512 {
            anyhow::bail!("Insufficient data for exFAT boot sector");
        }
        if !is_exfat_boot_sector(data) {
            anyhow::bail!("Invalid exFAT signature");
        }

        let mut cursor = Cursor::new(data);
        cursor.set_position(64);

        let _partition_offset = cursor.read_u64::<LittleEndian>()?;
        let volume_length = cursor.read_u64::<LittleEndian>()?;
        let fat_offset = cursor.read_u32::<LittleEndian>()?;
        let fat_length = cursor.read_u32::<LittleEndian>()?;
        let cluster_heap_offset = cursor.read_u32::<LittleEndian>()?;
        let cluster_count = cursor.read_u32::<LittleEndian>()?;
        let first_cluster_of_root_directory = cursor.read_u32::<LittleEndian>()?;
        let volume_serial_number = cursor.read_u32::<LittleEndian>()?;
        let file_system_revision = cursor.read_u16::<LittleEndian>()?;
        let volume_flags = cursor.read_u16::<LittleEndian>()?;
        let bytes_per_sector_shift = cursor.read_u8()?;
        let sectors_per_cluster_shift = cursor.read_u8()?;
        let number_of_fats = cursor.read_u8()?;

        if !(9..=12).contains(&bytes_per_sector_shift) {
            anyhow::bail!("Bad exFAT sector shift {}", bytes_per_sector_shift);
        }
        if u32::from(bytes_per_sector_shift) + u32::from(sectors_per_cluster_shift) > 25 {
            anyhow::bail!("Bad exFAT cluster shift {}", sectors_per_cluster_shift);
        }
        if cluster_count == 0 || fat_length == 0 {
            anyhow::bail!("exFAT volume has no clusters");
        }
        // Offsets are in sectors; both regions follow the boot sector
        if fat_offset == 0 || cluster_heap_offset == 0 {
            anyhow::bail!(
                "Bad exFAT layout: FAT at sector {}, cluster heap at sector {}",
                fat_offset,
                cluster_heap_offset
            );
        }
        if first_cluster_of_root_directory < fat::FIRST_DATA_CLUSTER {
            anyhow::bail!(
                "Bad exFAT root directory cluster {}",
                first_cluster_of_root_directory
            );
        }

        Ok(ExFatBootSector {
            volume_length,
            fat_offset,
            fat_length,
            cluster_heap_offset,
            cluster_count,
            first_cluster_of_root_directory,
            volume_serial_number,
            file_system_revision,
            volume_flags,
            bytes_per_sector_shift,
            sectors_per_cluster_shift,
            number_of_fats,
        })
    }

    /// Get bytes per sector
    pub fn bytes_per_sector(&self) -> u32 {
        1 << self.bytes_per_sector_shift
    }

    /// Get sectors per cluster
    pub fn sectors_per_cluster(&self) -> u32 {
        1 << self.sectors_per_cluster_shift
    }

    /// Get bytes per cluster
    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector() * self.sectors_per_cluster()
    }
}

/// Check if data contains exFAT boot sector signature
pub fn is_exfat_boot_sector(data: &[u8]) -> bool {
    if data.len() < 11 {
        return false;
    }

    // exFAT signature is at offset 3
    &data[3..11] == EXFAT_SIGNATURE
}

/// Convert an exFAT timestamp to Unix seconds
///
/// The UTC offset byte is honoured when its valid bit is set; invalid
/// dates convert to 0.
pub fn exfat_timestamp(stamp: u32, utc_offset: u8) -> i64 {
    let year = 1980 + (stamp >> 25) as i32;
    let month = (stamp >> 21) & 0x0F;
    let day = (stamp >> 16) & 0x1F;
    let hour = (stamp >> 11) & 0x1F;
    let minute = (stamp >> 5) & 0x3F;
    let second = (stamp & 0x1F) * 2;

    let Some(local) = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
    else {
        return 0;
    };

    let mut seconds = local.and_utc().timestamp();
    if utc_offset & 0x80 != 0 {
        // Signed 7-bit count of 15 minute intervals
        let quarters = i64::from(utc_offset & 0x7F);
        let quarters = if quarters >= 0x40 { quarters - 0x80 } else { quarters };
        seconds -= quarters * 15 * 60;
    }
    seconds
}

/// An exFAT volume opened for walking
pub struct ExFatFileSystem {
    region: DeviceRegion,
    boot: ExFatBootSector,
    fat: FatTable,
}

impl ExFatFileSystem {
    pub fn open(region: DeviceRegion) -> Result<Self> {
        let boot = ExFatBootSector::parse(region.read_sector(0)?)?;
        let fat = FatTable::new(region.clone(), &boot);

        tracing::debug!(
            "exFAT at 0x{:x}: serial {:08x}, revision {}.{}, {} FAT(s), {} clusters of {} bytes, root cluster {}",
            region.offset(),
            boot.volume_serial_number,
            boot.file_system_revision >> 8,
            boot.file_system_revision & 0xFF,
            boot.number_of_fats,
            boot.cluster_count,
            boot.bytes_per_cluster(),
            boot.first_cluster_of_root_directory
        );

        Ok(ExFatFileSystem { region, boot, fat })
    }

    fn max_directory_clusters(&self) -> usize {
        usize::try_from(MAX_DIRECTORY_BYTES / self.fat.cluster_size()).unwrap_or(usize::MAX)
    }

    /// Clusters holding the data of an entry set
    fn data_clusters(&self, set: &FileEntrySet) -> Vec<u32> {
        let stream = &set.stream_extension;
        let wanted = stream.data_length.div_ceil(self.fat.cluster_size());
        let wanted = usize::try_from(wanted)
            .unwrap_or(usize::MAX)
            .min(self.max_directory_clusters());

        if stream.is_contiguous() {
            self.fat.contiguous_run(stream.first_cluster, wanted)
        } else {
            self.fat.get_chain(stream.first_cluster, wanted)
        }
    }

    fn root_clusters(&self) -> Vec<u32> {
        self.fat.get_chain(
            self.boot.first_cluster_of_root_directory,
            self.max_directory_clusters(),
        )
    }

    /// Offset of the entry after the one at `offset`, following the cluster chain
    fn next_entry_offset(&self, offset: u64) -> Result<u64> {
        let next = offset + ENTRY_SIZE as u64;
        let cluster = self
            .fat
            .cluster_at(offset)
            .ok_or_else(|| anyhow::anyhow!("Entry at 0x{:x} lies outside the cluster heap", offset))?;
        if next < self.fat.cluster_offset(cluster) + self.fat.cluster_size() {
            return Ok(next);
        }
        // NoFatChain directories carry no FAT entries and simply continue
        let following = self.fat.next_cluster(cluster).unwrap_or(cluster + 1);
        Ok(self.fat.cluster_offset(following))
    }

    /// Resolve an inode address to its entry set, checksum verified
    fn entry_set(&self, inode: u64) -> Result<FileEntrySet> {
        let mut offset = inode
            .checked_mul(ENTRY_SIZE as u64)
            .ok_or_else(|| anyhow::anyhow!("Inode {} out of range", inode))?;

        let primary = self.region.read_bytes(offset, ENTRY_SIZE)?;
        if primary[0] != ENTRY_TYPE_FILE {
            anyhow::bail!("Inode {} is not a file entry (type 0x{:02x})", inode, primary[0]);
        }
        let len = FileEntrySet::set_len(primary)
            .ok_or_else(|| anyhow::anyhow!("Inode {} has a bad secondary count", inode))?;

        let mut data = Vec::with_capacity(len);
        data.extend_from_slice(primary);
        while data.len() < len {
            offset = self.next_entry_offset(offset)?;
            data.extend_from_slice(self.region.read_bytes(offset, ENTRY_SIZE)?);
        }

        let set = FileEntrySet::parse(&data)?;
        if !set.verify_checksum(&data) {
            anyhow::bail!("Inode {} fails its entry set checksum", inode);
        }
        Ok(set)
    }

    fn file_meta(&self, inode: u64, set: &FileEntrySet) -> FileMeta {
        let entry = &set.file_entry;
        let (meta_type, mut mode) = if entry.is_directory() {
            (MetaType::DIRECTORY, 0o777)
        } else {
            (MetaType::REGULAR, 0o666)
        };
        if entry.is_read_only() {
            mode &= !0o222;
        }

        FileMeta {
            address: inode,
            uid: 0,
            gid: 0,
            mode,
            size: set.stream_extension.data_length,
            atime: exfat_timestamp(entry.access_timestamp, entry.access_utc_offset),
            mtime: exfat_timestamp(entry.modify_timestamp, entry.modify_utc_offset),
            crtime: exfat_timestamp(entry.create_timestamp, entry.create_utc_offset),
            nlink: 1,
            meta_type,
            names: vec![set.filename.clone()],
        }
    }

    fn root_file(&self) -> FsFile {
        let size = self.root_clusters().len() as u64 * self.fat.cluster_size();
        FsFile {
            name: None,
            meta: Some(FileMeta {
                address: ROOT_INODE,
                uid: 0,
                gid: 0,
                mode: 0o777,
                size,
                atime: 0,
                mtime: 0,
                crtime: 0,
                nlink: 1,
                meta_type: MetaType::DIRECTORY,
                names: Vec::new(),
            }),
            block_size: Some(self.fat.cluster_size()),
        }
    }

    /// Read and parse the directory stored in `clusters`
    fn read_directory(&self, clusters: &[u32]) -> Result<ExFatDirectory> {
        let data = self.fat.read_clusters(clusters)?;
        let cluster_size = self.fat.cluster_size() as usize;
        let mut entries = Vec::new();

        let mut pos = 0;
        while pos + ENTRY_SIZE <= data.len() {
            let kind = data[pos];
            if kind == ENTRY_TYPE_END {
                break;
            }
            // Bitmap, up-case, label, deleted and stray secondary entries
            if kind != ENTRY_TYPE_FILE {
                pos += ENTRY_SIZE;
                continue;
            }

            let cluster = clusters[pos / cluster_size];
            let inode = (self.fat.cluster_offset(cluster) + (pos % cluster_size) as u64)
                / ENTRY_SIZE as u64;

            let end = FileEntrySet::set_len(&data[pos..]).map(|len| pos + len);
            match end.filter(|&end| end <= data.len()) {
                Some(end) => match FileEntrySet::parse(&data[pos..end]) {
                    Ok(set) => {
                        entries.push(Some(FsFile {
                            name: Some(set.filename.clone()),
                            meta: Some(self.file_meta(inode, &set)),
                            block_size: Some(self.fat.cluster_size()),
                        }));
                        pos = end;
                    }
                    Err(e) => {
                        tracing::debug!("exFAT entry set at inode {}: {}", inode, e);
                        entries.push(None);
                        pos += ENTRY_SIZE;
                    }
                },
                None => {
                    tracing::debug!("exFAT entry set at inode {} is truncated", inode);
                    entries.push(None);
                    pos += ENTRY_SIZE;
                }
            }
        }

        Ok(ExFatDirectory { entries })
    }

    fn directory_clusters(&self, inode: u64) -> Result<Vec<u32>> {
        if inode == ROOT_INODE {
            return Ok(self.root_clusters());
        }
        let set = self.entry_set(inode)?;
        if !set.file_entry.is_directory() {
            anyhow::bail!("Inode {} is not a directory", inode);
        }
        Ok(self.data_clusters(&set))
    }
}

impl FileSystem for ExFatFileSystem {
    fn type_name(&self) -> &str {
        "exfat"
    }

    fn flags(&self) -> u32 {
        u32::from(self.boot.volume_flags)
    }

    fn offset(&self) -> u64 {
        self.region.offset()
    }

    fn block_size(&self) -> u64 {
        self.fat.cluster_size()
    }

    fn block_count(&self) -> u64 {
        u64::from(self.boot.cluster_count)
    }

    fn inode_count(&self) -> u64 {
        self.boot
            .volume_length
            .saturating_mul(u64::from(self.boot.bytes_per_sector()))
            / ENTRY_SIZE as u64
    }

    fn root_inode(&self) -> u64 {
        ROOT_INODE
    }

    fn open_dir(&self, inode: u64) -> Result<Box<dyn Directory + '_>> {
        let clusters = self.directory_clusters(inode)?;
        Ok(Box::new(self.read_directory(&clusters)?))
    }

    fn open_inode(&self, inode: u64) -> Result<FsFile> {
        if inode == ROOT_INODE {
            return Ok(self.root_file());
        }
        let set = self.entry_set(inode)?;
        Ok(FsFile {
            name: Some(set.filename.clone()),
            meta: Some(self.file_meta(inode, &set)),
            block_size: Some(self.fat.cluster_size()),
        })
    }

    fn open_path(&self, path: &str) -> Result<FsFile> {
        let mut current = self.root_file();

        for component in path.split('/').filter(|c| !c.is_empty()) {
            let dir_inode = match &current.meta {
                Some(meta) if meta.meta_type == MetaType::DIRECTORY => meta.address,
                _ => anyhow::bail!("{}: not a directory before {:?}", path, component),
            };

            let wanted = component.to_lowercase();
            let dir = self.read_directory(&self.directory_clusters(dir_inode)?)?;
            current = dir
                .entries
                .into_iter()
                .flatten()
                .find(|file| {
                    file.name
                        .as_deref()
                        .is_some_and(|name| name.to_lowercase() == wanted)
                })
                .ok_or_else(|| anyhow::anyhow!("{}: no entry named {:?}", path, component))?;
        }

        Ok(current)
    }
}

/// A parsed exFAT directory; `None` marks a malformed entry set
pub struct ExFatDirectory {
    entries: Vec<Option<FsFile>>,
}

impl Directory for ExFatDirectory {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn entry(&self, index: usize) -> Option<FsFile> {
        self.entries.get(index).cloned().flatten()
    }
}
