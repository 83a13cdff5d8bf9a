//! Mapping of filesystem metadata onto file records
use crate::backend::{FsFile, MetaType};
use crate::record::FileRecord;

const TYPE_NAMES: &[(MetaType, &str)] = &[
    (MetaType::REGULAR, "regular"),
    (MetaType::DIRECTORY, "directory"),
    (MetaType::SYMLINK, "symlink"),
    (MetaType::BLOCK, "block"),
    (MetaType::CHARACTER, "character"),
    (MetaType::FIFO, "fifo"),
    (MetaType::SOCKET, "socket"),
];

/// Name for a metadata type code; unlisted codes are "unknown"
pub fn type_name(meta_type: MetaType) -> &'static str {
    TYPE_NAMES
        .iter()
        .find(|(code, _)| *code == meta_type)
        .map(|(_, name)| *name)
        .unwrap_or("unknown")
}

/// Permission bits rendered as a four digit octal string
pub fn mode_text(mode: u32) -> String {
    format!("{:04o}", mode & 0o7777)
}

/// Last segment of an image path
pub fn file_name(path: &str) -> &str {
    if !path.is_empty() && path.bytes().all(|b| b == b'/') {
        return "/";
    }
    path.rsplit('/').next().unwrap_or(path)
}

/// Join an entry name onto a directory path
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Append the record for `file`, shown at `path`, to `results`
///
/// Path-level fields are always set; metadata fields only when the
/// metadata could be read.
pub fn map_file(
    device: &str,
    partition: &str,
    file: &FsFile,
    path: &str,
    results: &mut Vec<FileRecord>,
) {
    let mut record = FileRecord {
        device: device.to_string(),
        partition: partition.to_string(),
        path: path.to_string(),
        filename: file_name(path).to_string(),
        block_size: file.block_size,
        ..Default::default()
    };

    if let Some(meta) = &file.meta {
        record.inode = Some(meta.address);
        record.uid = Some(meta.uid);
        record.gid = Some(meta.gid);
        record.mode = Some(mode_text(meta.mode));
        record.size = Some(meta.size);
        record.atime = Some(meta.atime);
        record.mtime = Some(meta.mtime);
        record.ctime = Some(meta.crtime);
        record.hard_links = Some(meta.nlink);
        record.file_type = Some(type_name(meta.meta_type).to_string());
    }

    results.push(record);
}
