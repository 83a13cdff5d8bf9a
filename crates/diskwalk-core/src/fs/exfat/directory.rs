//! exFAT directory entry parsing
//!
//! exFAT uses 32-byte directory entries. A file or directory is described
//! by an entry set: one primary entry followed by secondary entries.
//! - 0x85: File entry (deleted: 0x05)
//! - 0xC0: Stream extension (deleted: 0x40)
//! - 0xC1: File name entry (deleted: 0x41)
//! - 0x81: Allocation bitmap
//! - 0x82: Up-case table
//! - 0x83: Volume label

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use encoding_rs::UTF_16LE;
use std::io::Cursor;

/// Directory entry size in bytes
pub const ENTRY_SIZE: usize = 32;

/// Entry type codes (high bit set = in-use)
pub const ENTRY_TYPE_END: u8 = 0x00;
pub const ENTRY_TYPE_FILE: u8 = 0x85;
pub const ENTRY_TYPE_STREAM: u8 = 0xC0;
pub const ENTRY_TYPE_FILENAME: u8 = 0xC1;

/// File attributes
pub const ATTR_READ_ONLY: u16 = 0x01;
pub const ATTR_DIRECTORY: u16 = 0x10;

/// A stream entry plus at least one name entry, at most 255 characters of name
const MIN_SECONDARY_COUNT: u8 = 2;
const MAX_SECONDARY_COUNT: u8 = 18;

/// UTF-16 code units held by one file name entry
const NAME_CHARS_PER_ENTRY: usize = 15;

/// File entry (primary entry for a file or directory)
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Number of secondary entries (StreamExtension + FileNames)
    pub secondary_count: u8,
    /// Checksum of all entries in set
    pub set_checksum: u16,
    /// File attributes (directory, hidden, etc.)
    pub file_attributes: u16,
    pub create_timestamp: u32,
    pub modify_timestamp: u32,
    pub access_timestamp: u32,
    pub create_utc_offset: u8,
    pub modify_utc_offset: u8,
    pub access_utc_offset: u8,
}

impl FileEntry {
    /// Parse file entry from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ENTRY_SIZE || data[0] != ENTRY_TYPE_FILE {
            anyhow::bail!("Not an exFAT file entry");
        }

        let mut cursor = Cursor::new(data);
        cursor.set_position(1);
        let secondary_count = cursor.read_u8()?;
        let set_checksum = cursor.read_u16::<LittleEndian>()?;
        let file_attributes = cursor.read_u16::<LittleEndian>()?;
        let _reserved1 = cursor.read_u16::<LittleEndian>()?;
        let create_timestamp = cursor.read_u32::<LittleEndian>()?;
        let modify_timestamp = cursor.read_u32::<LittleEndian>()?;
        let access_timestamp = cursor.read_u32::<LittleEndian>()?;

        Ok(FileEntry {
            secondary_count,
            set_checksum,
            file_attributes,
            create_timestamp,
            modify_timestamp,
            access_timestamp,
            create_utc_offset: data[22],
            modify_utc_offset: data[23],
            access_utc_offset: data[24],
        })
    }

    /// Check if this is a directory
    pub fn is_directory(&self) -> bool {
        self.file_attributes & ATTR_DIRECTORY != 0
    }

    pub fn is_read_only(&self) -> bool {
        self.file_attributes & ATTR_READ_ONLY != 0
    }
}

/// Stream extension entry (contains size and cluster info)
#[derive(Debug, Clone)]
pub struct StreamExtensionEntry {
    /// General flags (NoFatChain bit)
    pub general_flags: u8,
    /// File name length in characters
    pub name_length: u8,
    pub first_cluster: u32,
    /// Data length (file size)
    pub data_length: u64,
}

impl StreamExtensionEntry {
    /// Parse stream extension entry from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ENTRY_SIZE || data[0] != ENTRY_TYPE_STREAM {
            anyhow::bail!("Missing exFAT stream extension entry");
        }

        let mut cursor = Cursor::new(data);
        cursor.set_position(1);
        let general_flags = cursor.read_u8()?;
        let _reserved = cursor.read_u8()?;
        let name_length = cursor.read_u8()?;
        let _name_hash = cursor.read_u16::<LittleEndian>()?;
        let _reserved2 = cursor.read_u16::<LittleEndian>()?;
        let _valid_data_length = cursor.read_u64::<LittleEndian>()?;
        let _reserved3 = cursor.read_u32::<LittleEndian>()?;
        let first_cluster = cursor.read_u32::<LittleEndian>()?;
        let data_length = cursor.read_u64::<LittleEndian>()?;

        Ok(StreamExtensionEntry {
            general_flags,
            name_length,
            first_cluster,
            data_length,
        })
    }

    /// Check if file uses contiguous allocation (NoFatChain)
    pub fn is_contiguous(&self) -> bool {
        self.general_flags & 0x02 != 0
    }
}

/// A complete file entry set (File + StreamExtension + FileNames)
#[derive(Debug, Clone)]
pub struct FileEntrySet {
    pub file_entry: FileEntry,
    pub stream_extension: StreamExtensionEntry,
    /// Complete filename (concatenated from FileName entries)
    pub filename: String,
}

impl FileEntrySet {
    /// Number of bytes the set starting with `primary` occupies
    pub fn set_len(primary: &[u8]) -> Option<usize> {
        let count = *primary.get(1)?;
        if !(MIN_SECONDARY_COUNT..=MAX_SECONDARY_COUNT).contains(&count) {
            return None;
        }
        Some((usize::from(count) + 1) * ENTRY_SIZE)
    }

    /// Parse a set laid out contiguously in `data`
    pub fn parse(data: &[u8]) -> Result<Self> {
        let file_entry = FileEntry::parse(data)?;
        let len = Self::set_len(data)
            .ok_or_else(|| anyhow::anyhow!("Bad secondary count {}", file_entry.secondary_count))?;
        if data.len() < len {
            anyhow::bail!("Truncated exFAT entry set");
        }

        let stream_extension = StreamExtensionEntry::parse(&data[ENTRY_SIZE..])?;

        let mut name_units = Vec::with_capacity(len);
        for entry in data[2 * ENTRY_SIZE..len].chunks_exact(ENTRY_SIZE) {
            if entry[0] != ENTRY_TYPE_FILENAME {
                break;
            }
            name_units.extend_from_slice(&entry[2..ENTRY_SIZE]);
        }

        let name_length = usize::from(stream_extension.name_length);
        if name_length > name_units.len() / 2 {
            anyhow::bail!(
                "Name of {} characters exceeds {} name entries",
                name_length,
                name_units.len() / (2 * NAME_CHARS_PER_ENTRY)
            );
        }
        name_units.truncate(name_length * 2);
        let (filename, _had_errors) = UTF_16LE.decode_without_bom_handling(&name_units);

        Ok(FileEntrySet {
            file_entry,
            stream_extension,
            filename: filename.into_owned(),
        })
    }

    /// Whether the stored set checksum matches the set's bytes
    pub fn verify_checksum(&self, data: &[u8]) -> bool {
        match Self::set_len(data) {
            Some(len) if data.len() >= len => set_checksum(&data[..len]) == self.file_entry.set_checksum,
            _ => false,
        }
    }
}

/// exFAT entry set checksum; bytes 2-3 of the primary entry hold the checksum itself
pub fn set_checksum(data: &[u8]) -> u16 {
    data.iter().enumerate().fold(0u16, |sum, (i, &byte)| {
        if i == 2 || i == 3 {
            sum
        } else {
            sum.rotate_right(1).wrapping_add(u16::from(byte))
        }
    })
}

/// Entry-set builder for synthetic test volumes
#[doc(hidden)]
pub mod fixture {
    use super::*;
    use byteorder::ByteOrder;

    /// 2021-03-04 05:06:08
    pub const STAMP: u32 = (41 << 25) | (3 << 21) | (4 << 16) | (5 << 11) | (6 << 5) | 4;

    /// File, stream and name entries for `name`, with the set checksum filled in
    pub fn entry_set(
        name: &str,
        attributes: u16,
        stream_flags: u8,
        first_cluster: u32,
        size: u64,
    ) -> Vec<u8> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let name_entries = units.len().div_ceil(NAME_CHARS_PER_ENTRY).max(1);
        let mut set = vec![0u8; (2 + name_entries) * ENTRY_SIZE];

        set[0] = ENTRY_TYPE_FILE;
        set[1] = (1 + name_entries) as u8;
        LittleEndian::write_u16(&mut set[4..], attributes);
        LittleEndian::write_u32(&mut set[8..], STAMP);
        LittleEndian::write_u32(&mut set[12..], STAMP);
        LittleEndian::write_u32(&mut set[16..], STAMP);

        let stream = &mut set[ENTRY_SIZE..2 * ENTRY_SIZE];
        stream[0] = ENTRY_TYPE_STREAM;
        stream[1] = stream_flags;
        stream[3] = units.len() as u8;
        LittleEndian::write_u64(&mut stream[8..], size);
        LittleEndian::write_u32(&mut stream[20..], first_cluster);
        LittleEndian::write_u64(&mut stream[24..], size);

        for (i, chunk) in units.chunks(NAME_CHARS_PER_ENTRY).enumerate() {
            let entry = &mut set[(2 + i) * ENTRY_SIZE..(3 + i) * ENTRY_SIZE];
            entry[0] = ENTRY_TYPE_FILENAME;
            for (j, unit) in chunk.iter().enumerate() {
                LittleEndian::write_u16(&mut entry[2 + j * 2..], *unit);
            }
        }

        let checksum = set_checksum(&set);
        LittleEndian::write_u16(&mut set[2..], checksum);
        set
    }
}
