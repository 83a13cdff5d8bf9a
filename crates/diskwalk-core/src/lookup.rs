//! Targeted lookups that bypass the tree walk
use crate::backend::FileSystem;
use crate::record::FileRecord;
use crate::walker::TreeWalker;

/// Record the file at `path`, shown with that literal path
///
/// Returns `false`, leaving `results` untouched, when the path does not
/// resolve.
pub fn lookup_path(
    walker: &TreeWalker,
    partition: &str,
    fs: &dyn FileSystem,
    path: &str,
    results: &mut Vec<FileRecord>,
) -> bool {
    match fs.open_path(path) {
        Ok(file) => {
            walker.generate_file(partition, &file, path, results);
            true
        }
        Err(e) => {
            tracing::debug!("Skipping path {}: {}", path, e);
            false
        }
    }
}

/// Record the file at the decimal inode address `inode`
///
/// The display path is the first name attached to the metadata, or empty.
/// Returns `false` when the address does not parse or does not open.
pub fn lookup_inode(
    walker: &TreeWalker,
    partition: &str,
    fs: &dyn FileSystem,
    inode: &str,
    results: &mut Vec<FileRecord>,
) -> bool {
    let address = match inode.trim().parse::<u64>() {
        Ok(address) => address,
        Err(e) => {
            tracing::debug!("Skipping inode {:?}: {}", inode, e);
            return false;
        }
    };

    match fs.open_inode(address) {
        Ok(file) => {
            let path = file
                .meta
                .as_ref()
                .and_then(|meta| meta.names.first())
                .cloned()
                .unwrap_or_default();
            walker.generate_file(partition, &file, &path, results);
            true
        }
        Err(e) => {
            tracing::debug!("Skipping inode {}: {}", address, e);
            false
        }
    }
}
