//! Query behavior over synthetic in-memory images

use diskwalk_core::backend::{MemoryFileSystem, MemoryImage, MemoryVolume, PartitionFlags};
use diskwalk_core::{
    list_files, list_partitions, FileQuery, MemoryBackend, PartitionQuery, TreeWalker, WalkConfig,
};
use std::collections::BTreeSet;

fn set(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn file_query(devices: &[&str], partitions: &[&str]) -> FileQuery {
    FileQuery {
        devices: set(devices),
        partitions: set(partitions),
        ..Default::default()
    }
}

/// Table, gap, then an ext4 partition at address 2
fn backend_with(fs: MemoryFileSystem) -> MemoryBackend {
    let volume = MemoryVolume::new(512)
        .with_partition(Some("Primary Table (#0)"), 0, 1, PartitionFlags::META)
        .with_partition(Some("Unallocated"), 1, 2047, PartitionFlags::UNALLOCATED)
        .with_partition(Some("Linux (0x83)"), 2048, 4096, PartitionFlags::ALLOCATED)
        .with_filesystem(2, fs);
    MemoryBackend::new().with_image("/dev/sda", MemoryImage::new(volume))
}

fn sample_fs() -> MemoryFileSystem {
    let mut fs = MemoryFileSystem::new("ext4", 2)
        .with_geometry(1_048_576, 4096, 512, 128)
        .with_flags(0x5);
    let etc = fs.add_dir(2, "etc", 11);
    fs.add_file(etc, "passwd", 12, 1024);
    fs.add_file(etc, "shadow", 13, 512);
    fs.add_file(2, "vmlinuz", 14, 8_000_000);
    fs
}

#[test]
fn test_partition_listing() {
    let backend = backend_with(sample_fs());
    let records = list_partitions(
        &backend,
        &PartitionQuery {
            devices: set(&["/dev/sda", "/dev/missing"]),
        },
    );

    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.device == "/dev/sda"));

    let table = &records[0];
    assert_eq!(table.partition_type, "meta");
    assert_eq!(table.flags, PartitionFlags::META.bits());
    assert_eq!(table.inodes, -1);

    let gap = &records[1];
    assert_eq!(gap.partition_type, "unallocated");
    assert_eq!(gap.offset, 512);
    assert_eq!(gap.blocks_size, 512);
    assert_eq!(gap.blocks, 2047);
    assert_eq!(gap.inodes, -1);

    let linux = &records[2];
    assert_eq!(linux.label.as_deref(), Some("Linux (0x83)"));
    assert_eq!(linux.partition_type, "ext4");
    assert_eq!(linux.flags, 0x5);
    assert_eq!(linux.offset, 1_048_576);
    assert_eq!(linux.blocks_size, 4096);
    assert_eq!(linux.blocks, 512);
    assert_eq!(linux.inodes, 128);
}

#[test]
fn test_unreadable_devices_list_nothing() {
    let backend = MemoryBackend::new().with_image("/img/blank.dd", MemoryImage::without_volume());
    let records = list_partitions(
        &backend,
        &PartitionQuery {
            devices: set(&["/img/blank.dd", "/dev/missing"]),
        },
    );
    assert!(records.is_empty());
}

#[test]
fn test_full_walk() {
    let backend = backend_with(sample_fs());
    let records = list_files(&backend, &file_query(&["/dev/sda"], &["2"]), &WalkConfig::default());

    let paths: Vec<_> = records.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["/vmlinuz", "/etc/passwd", "/etc/shadow"]);

    let passwd = &records[1];
    assert_eq!(passwd.device, "/dev/sda");
    assert_eq!(passwd.partition, "2");
    assert_eq!(passwd.filename, "passwd");
    assert_eq!(passwd.mode.as_deref(), Some("0644"));
    assert_eq!(passwd.file_type.as_deref(), Some("regular"));
    assert_eq!(passwd.block_size, Some(4096));
}

#[test]
fn test_filters_are_validated() {
    let backend = backend_with(sample_fs());
    let config = WalkConfig::default();

    assert!(list_files(&backend, &file_query(&[], &["2"]), &config).is_empty());
    assert!(list_files(&backend, &file_query(&["/dev/sda"], &[]), &config).is_empty());
    assert!(list_files(&backend, &file_query(&["/dev/sda"], &["1", "2"]), &config).is_empty());
    // A partition without a filesystem yields nothing
    assert!(list_files(&backend, &file_query(&["/dev/sda"], &["1"]), &config).is_empty());
}

#[test]
fn test_path_and_inode_lookups() {
    let backend = backend_with(sample_fs());
    let query = FileQuery {
        paths: set(&["/etc/passwd", "/etc/missing"]),
        inodes: set(&["12", "abc", " 14 ", "-1", "99"]),
        ..file_query(&["/dev/sda"], &["2"])
    };
    let records = list_files(&backend, &query, &WalkConfig::default());

    let found: Vec<_> = records
        .iter()
        .map(|r| (r.path.as_str(), r.inode))
        .collect();
    // Paths first, then inodes in set order
    assert_eq!(
        found,
        vec![
            ("/etc/passwd", Some(12)),
            ("vmlinuz", Some(14)),
            ("passwd", Some(12)),
        ]
    );
}

#[test]
fn test_deep_chain_is_bounded() {
    let mut fs = MemoryFileSystem::new("ext4", 2);
    let mut parent = 2;
    for i in 0..2000u64 {
        parent = fs.add_dir(parent, "d", 100 + i);
        fs.add_file(parent, "f", 10_000 + i, 1);
    }

    let mut walker = TreeWalker::new("/dev/sda", &WalkConfig::default());
    let mut results = Vec::new();
    let stats = walker.generate_files("2", &fs, "/", 0, &mut results);

    assert!(stats.truncated);
    assert_eq!(stats.directories, 1024);
    assert_eq!(results.len(), 1023);

    // Same cut-off through the query surface
    let backend = backend_with(fs);
    let records = list_files(&backend, &file_query(&["/dev/sda"], &["2"]), &WalkConfig::default());
    assert_eq!(records.len(), 1023);
}

#[test]
fn test_directory_cycle_terminates() {
    let mut fs = MemoryFileSystem::new("ext4", 2);
    let d = fs.add_dir(2, "d", 20);
    fs.add_file(d, "f", 21, 1);
    fs.link(d, Some("loop"), d);

    let mut walker = TreeWalker::new("/dev/sda", &WalkConfig { max_descents: 50 });
    let mut results = Vec::new();
    let stats = walker.generate_files("2", &fs, "/", 0, &mut results);

    assert!(stats.truncated);
    assert_eq!(stats.directories, 50);
    assert_eq!(results[0].path, "/d/f");
    assert_eq!(results[1].path, "/d/loop/f");
}

#[test]
fn test_sibling_duplicates_descend_once() {
    let mut fs = MemoryFileSystem::new("ext4", 2);
    let first = fs.add_dir(2, "dup", 20);
    let second = fs.add_dir(2, "dup", 21);
    fs.add_file(first, "x", 30, 1);
    fs.add_file(second, "y", 31, 1);

    let mut walker = TreeWalker::new("/dev/sda", &WalkConfig::default());
    let mut results = Vec::new();
    let stats = walker.generate_files("2", &fs, "/", 0, &mut results);

    assert_eq!(stats.directories, 2);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].path, "/dup/x");
}

#[test]
fn test_cross_path_duplicates_are_kept() {
    let mut fs = MemoryFileSystem::new("ext4", 2);
    let a = fs.add_dir(2, "a", 20);
    let b = fs.add_dir(2, "b", 21);
    let shared = fs.add_dir(a, "shared", 40);
    fs.link(b, Some("shared"), shared);
    fs.add_file(shared, "f", 41, 1);

    let backend = backend_with(fs);
    let records = list_files(&backend, &file_query(&["/dev/sda"], &["2"]), &WalkConfig::default());

    let paths: Vec<_> = records.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["/a/shared/f", "/b/shared/f"]);
    assert!(records.iter().all(|r| r.inode == Some(41)));
}

#[test]
fn test_unknown_type_codes() {
    use diskwalk_core::backend::MetaType;

    let mut fs = MemoryFileSystem::new("ext4", 2);
    fs.add_file(2, "odd", 12, 1);
    fs.insert_node(13, MetaType::SYMLINK, Some("link"), 4);
    fs.link(2, Some("link"), 13);
    if let Some(meta) = fs.meta_mut(12) {
        meta.meta_type = MetaType(42);
    }

    let backend = backend_with(fs);
    let query = FileQuery {
        inodes: set(&["12", "13"]),
        ..file_query(&["/dev/sda"], &["2"])
    };
    let records = list_files(&backend, &query, &WalkConfig::default());

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].file_type.as_deref(), Some("unknown"));
    assert_eq!(records[1].file_type.as_deref(), Some("symlink"));
}
