//! Queries against a synthetic MBR disk holding one exFAT partition
//!
//! Layout, in 512-byte sectors:
//! - 0: MBR with one exFAT/NTFS (0x07) entry at LBA 64, 192 sectors
//! - 64..256: exFAT, FAT at +24, cluster heap at +32, one sector per cluster
//! - 256..272: trailing unallocated space

use diskwalk_core::fs::exfat::directory::fixture::entry_set;
use diskwalk_core::fs::exfat::directory::{ATTR_DIRECTORY, ATTR_READ_ONLY};
use diskwalk_core::{list_files, list_partitions, FileQuery, PartitionQuery, RawBackend, WalkConfig};
use std::collections::BTreeSet;
use std::io::Write;
use tempfile::NamedTempFile;

const SECTOR: usize = 512;
const PART_START: usize = 64;
const PART_SECTORS: usize = 192;
const IMAGE_SECTORS: usize = 272;
const FAT_OFFSET: usize = 24;
const HEAP_OFFSET: usize = 32;
const CLUSTER_COUNT: u32 = 160;
const ENTRY: usize = 32;

const ATTR_ARCHIVE: u16 = 0x20;

/// Stream flags: allocation possible, plus NoFatChain
const FAT_CHAINED: u8 = 0x01;
const CONTIGUOUS: u8 = 0x03;

// Entry sets are stamped 2021-03-04 05:06:08
const STAMP_UNIX: i64 = 1_614_834_368;

fn put_u16(data: &mut [u8], at: usize, value: u16) {
    data[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(data: &mut [u8], at: usize, value: u32) {
    data[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(data: &mut [u8], at: usize, value: u64) {
    data[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

fn partition_byte(sector: usize) -> usize {
    (PART_START + sector) * SECTOR
}

fn cluster_byte(cluster: u32) -> usize {
    partition_byte(HEAP_OFFSET) + (cluster as usize - 2) * SECTOR
}

/// Inode of the directory entry at `index` within `cluster`
fn inode_of(cluster: u32, index: usize) -> u64 {
    ((cluster_byte(cluster) - PART_START * SECTOR + index * ENTRY) / ENTRY) as u64
}

fn set_fat(image: &mut [u8], cluster: u32, value: u32) {
    put_u32(image, partition_byte(FAT_OFFSET) + cluster as usize * 4, value);
}

fn put_entries(image: &mut [u8], cluster: u32, index: usize, entries: &[u8]) {
    let at = cluster_byte(cluster) + index * ENTRY;
    image[at..at + entries.len()].copy_from_slice(entries);
}

fn build_image() -> Vec<u8> {
    let mut image = vec![0u8; IMAGE_SECTORS * SECTOR];

    // MBR
    let slot = 446;
    image[slot] = 0x80;
    image[slot + 4] = 0x07;
    put_u32(&mut image, slot + 8, PART_START as u32);
    put_u32(&mut image, slot + 12, PART_SECTORS as u32);
    image[510] = 0x55;
    image[511] = 0xAA;

    // Boot sector
    let boot = partition_byte(0);
    image[boot..boot + 3].copy_from_slice(&[0xEB, 0x76, 0x90]);
    image[boot + 3..boot + 11].copy_from_slice(b"EXFAT   ");
    put_u64(&mut image, boot + 64, PART_START as u64);
    put_u64(&mut image, boot + 72, PART_SECTORS as u64);
    put_u32(&mut image, boot + 80, FAT_OFFSET as u32);
    put_u32(&mut image, boot + 84, 8);
    put_u32(&mut image, boot + 88, HEAP_OFFSET as u32);
    put_u32(&mut image, boot + 92, CLUSTER_COUNT);
    put_u32(&mut image, boot + 96, 2);
    put_u16(&mut image, boot + 104, 0x0100);
    image[boot + 108] = 9;
    image[boot + 109] = 0;
    image[boot + 110] = 1;
    image[boot + 510] = 0x55;
    image[boot + 511] = 0xAA;

    // FAT: root directory 2 -> 9, a.jpg 4 -> 5; "photos" is contiguous
    set_fat(&mut image, 0, 0xFFFFFFF8);
    set_fat(&mut image, 1, 0xFFFFFFFF);
    set_fat(&mut image, 2, 9);
    set_fat(&mut image, 9, 0xFFFFFFFF);
    set_fat(&mut image, 4, 5);
    set_fat(&mut image, 5, 0xFFFFFFFF);

    // Root directory, cluster 2 continuing into cluster 9
    let mut label = vec![0u8; ENTRY];
    label[0] = 0x83;
    put_entries(&mut image, 2, 0, &label);
    let mut bitmap = vec![0u8; ENTRY];
    bitmap[0] = 0x81;
    put_entries(&mut image, 2, 1, &bitmap);

    let mut deleted = entry_set("gone.txt", ATTR_ARCHIVE, FAT_CHAINED, 20, 10);
    deleted[0] = 0x05;
    deleted[ENTRY] = 0x40;
    deleted[2 * ENTRY] = 0x41;
    put_entries(&mut image, 2, 2, &deleted);

    put_entries(&mut image, 2, 5, &entry_set("photos", ATTR_DIRECTORY, CONTIGUOUS, 3, 512));
    put_entries(
        &mut image,
        2,
        8,
        &entry_set("readme.txt", ATTR_ARCHIVE | ATTR_READ_ONLY, FAT_CHAINED, 6, 5),
    );
    put_entries(&mut image, 2, 11, &entry_set("spacer.bin", ATTR_ARCHIVE, FAT_CHAINED, 7, 64));

    // Entries 14 and 15 end cluster 2; the name entry lands in cluster 9
    let boundary = entry_set("boundary.log", ATTR_ARCHIVE, FAT_CHAINED, 8, 300);
    put_entries(&mut image, 2, 14, &boundary[..2 * ENTRY]);
    put_entries(&mut image, 9, 0, &boundary[2 * ENTRY..]);

    // photos, cluster 3
    put_entries(&mut image, 3, 0, &entry_set("a.jpg", ATTR_ARCHIVE, FAT_CHAINED, 4, 1000));
    put_entries(&mut image, 3, 3, &entry_set("b.jpg", ATTR_ARCHIVE, CONTIGUOUS, 10, 600));

    image
}

fn write_image() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&build_image()).unwrap();
    file.flush().unwrap();
    file
}

fn device_path(file: &NamedTempFile) -> String {
    file.path().to_str().unwrap().to_string()
}

fn set(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn files_query(device: &str, paths: &[&str], inodes: &[&str]) -> FileQuery {
    FileQuery {
        devices: set(&[device]),
        partitions: set(&["2"]),
        paths: set(paths),
        inodes: set(inodes),
    }
}

#[test]
fn test_partition_listing() {
    let file = write_image();
    let device = device_path(&file);
    let records = list_partitions(
        &RawBackend::new(),
        &PartitionQuery {
            devices: [device.clone()].into_iter().collect(),
        },
    );

    let summary: Vec<_> = records
        .iter()
        .map(|r| (r.partition, r.partition_type.as_str(), r.offset, r.blocks, r.inodes))
        .collect();
    assert_eq!(
        summary,
        vec![
            (0, "meta", 0, 1, -1),
            (1, "unallocated", 0, 64, -1),
            (2, "exfat", 64 * 512, 160, 192 * 512 / 32),
            (3, "unallocated", 256 * 512, 16, -1),
        ]
    );

    let exfat = &records[2];
    assert_eq!(exfat.label.as_deref(), Some("exFAT/NTFS (0x07)"));
    assert_eq!(exfat.blocks_size, 512);
    assert_eq!(exfat.flags, 0);
    assert_eq!(records[1].flags, 0x02);
    assert!(records.iter().all(|r| r.device == device));
}

#[test]
fn test_walk_exfat_partition() {
    let file = write_image();
    let device = device_path(&file);
    let records = list_files(
        &RawBackend::new(),
        &files_query(&device, &[], &[]),
        &WalkConfig::default(),
    );

    let paths: Vec<_> = records.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "/readme.txt",
            "/spacer.bin",
            "/boundary.log",
            "/photos/a.jpg",
            "/photos/b.jpg",
        ]
    );

    let readme = &records[0];
    assert_eq!(readme.filename, "readme.txt");
    assert_eq!(readme.inode, Some(inode_of(2, 8)));
    assert_eq!(readme.mode.as_deref(), Some("0444"));
    assert_eq!(readme.size, Some(5));
    assert_eq!(readme.mtime, Some(STAMP_UNIX));
    assert_eq!(readme.uid, Some(0));
    assert_eq!(readme.hard_links, Some(1));
    assert_eq!(readme.file_type.as_deref(), Some("regular"));
    assert_eq!(readme.block_size, Some(512));

    let a = &records[3];
    assert_eq!(a.mode.as_deref(), Some("0666"));
    assert_eq!(a.size, Some(1000));
}

#[test]
fn test_lookups() {
    let file = write_image();
    let device = device_path(&file);
    let photos = inode_of(2, 5);
    let boundary = inode_of(2, 14);
    assert_eq!((photos, boundary), (517, 526));

    let records = list_files(
        &RawBackend::new(),
        &files_query(
            &device,
            &["/PHOTOS/b.jpg", "/photos/missing.jpg"],
            &["526", "517", "2", "not-a-number", "1"],
        ),
        &WalkConfig::default(),
    );

    let found: Vec<_> = records
        .iter()
        .map(|r| (r.path.as_str(), r.inode, r.file_type.as_deref()))
        .collect();
    // Paths first, then inodes in set order; "1" is no entry set and the
    // root carries no name
    assert_eq!(
        found,
        vec![
            ("/PHOTOS/b.jpg", Some(inode_of(3, 3)), Some("regular")),
            ("", Some(2), Some("directory")),
            ("photos", Some(photos), Some("directory")),
            ("boundary.log", Some(boundary), Some("regular")),
        ]
    );
}

#[test]
fn test_walk_budget_applies() {
    let file = write_image();
    let device = device_path(&file);
    let records = list_files(
        &RawBackend::new(),
        &files_query(&device, &[], &[]),
        &WalkConfig { max_descents: 1 },
    );

    // Only the root directory is listed
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| !r.path.starts_with("/photos")));
}

#[test]
fn test_other_partitions_have_no_files() {
    let file = write_image();
    let device = device_path(&file);
    let query = FileQuery {
        partitions: ["1".to_string()].into_iter().collect(),
        ..files_query(&device, &[], &[])
    };
    assert!(list_files(&RawBackend::new(), &query, &WalkConfig::default()).is_empty());
}
