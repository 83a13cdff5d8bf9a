//! Bounded, cycle-safe directory walk
//!
//! A walk lists one directory, emits a record for each regular file in
//! native order, then descends into its subdirectories in ascending inode
//! order. Descents run on an explicit stack of frames, so deeply nested or
//! looping directory graphs never grow the call stack.
//!
//! Two guards keep hostile images in check:
//! - a descent budget (`WalkConfig::max_descents`) counted over the whole walk
//! - a visited-set of child paths, filled once a descent completes

use std::collections::{btree_map, BTreeMap, HashSet};

use crate::backend::{FileSystem, FsFile, MetaType};
use crate::config::WalkConfig;
use crate::mapper::{join_path, map_file};
use crate::record::FileRecord;

/// Per-walk traversal state
#[derive(Debug, Default)]
pub struct WalkState {
    descents: usize,
    visited: HashSet<String>,
}

impl WalkState {
    pub fn descents(&self) -> usize {
        self.descents
    }

    pub fn is_visited(&self, path: &str) -> bool {
        self.visited.contains(path)
    }

    pub fn reset(&mut self) {
        self.descents = 0;
        self.visited = HashSet::new();
    }
}

/// Counters for one call to [`TreeWalker::generate_files`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WalkStats {
    pub directories: u64,
    pub files: u64,
    pub skipped_entries: u64,
    /// At least one branch was cut off by the descent budget
    pub truncated: bool,
}

struct Frame {
    pending: btree_map::IntoIter<u64, String>,
    /// Child path currently being descended into
    descending: Option<String>,
}

/// Walks filesystems of one device
///
/// State carries over between calls until [`TreeWalker::reset`] is called,
/// so independent walks must reset in between.
pub struct TreeWalker {
    device: String,
    max_descents: usize,
    state: WalkState,
}

impl TreeWalker {
    pub fn new(device: impl Into<String>, config: &WalkConfig) -> Self {
        Self {
            device: device.into(),
            max_descents: config.max_descents,
            state: WalkState::default(),
        }
    }

    pub fn state(&self) -> &WalkState {
        &self.state
    }

    /// Clear the descent counter and the visited-set
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Walk from `inode` (0 means the root), shown as `path`
    pub fn generate_files(
        &mut self,
        partition: &str,
        fs: &dyn FileSystem,
        path: &str,
        inode: u64,
        results: &mut Vec<FileRecord>,
    ) -> WalkStats {
        let mut stats = WalkStats::default();
        let mut stack = Vec::new();

        if let Some(frame) = self.enter(partition, fs, path, inode, results, &mut stats) {
            stack.push(frame);
        }

        loop {
            let Some(frame) = stack.last_mut() else {
                break;
            };
            if let Some(done) = frame.descending.take() {
                self.state.visited.insert(done);
            }

            let Some((child_inode, child_path)) = frame.pending.next() else {
                stack.pop();
                continue;
            };
            if self.state.visited.contains(&child_path) {
                continue;
            }
            frame.descending = Some(child_path.clone());

            if let Some(child) =
                self.enter(partition, fs, &child_path, child_inode, results, &mut stats)
            {
                stack.push(child);
            }
        }

        if stats.truncated {
            tracing::warn!(
                "{}: walk of partition {} cut off after {} descents",
                self.device,
                partition,
                self.max_descents
            );
        }
        stats
    }

    /// Record one file at `path`
    pub fn generate_file(
        &self,
        partition: &str,
        file: &FsFile,
        path: &str,
        results: &mut Vec<FileRecord>,
    ) {
        map_file(&self.device, partition, file, path, results);
    }

    /// List one directory: emit its files and collect its subdirectories
    fn enter(
        &mut self,
        partition: &str,
        fs: &dyn FileSystem,
        path: &str,
        inode: u64,
        results: &mut Vec<FileRecord>,
        stats: &mut WalkStats,
    ) -> Option<Frame> {
        self.state.descents += 1;
        if self.state.descents > self.max_descents {
            stats.truncated = true;
            return None;
        }

        let address = if inode == 0 { fs.root_inode() } else { inode };
        let dir = match fs.open_dir(address) {
            Ok(dir) => dir,
            Err(e) => {
                tracing::debug!(
                    "{}: cannot open directory {} (inode {}): {}",
                    self.device,
                    path,
                    address,
                    e
                );
                return None;
            }
        };
        stats.directories += 1;

        // Keyed by inode: hard-linked duplicates collapse and descent order
        // does not depend on on-disk order.
        let mut pending = BTreeMap::new();
        for index in 0..dir.len() {
            let Some(file) = dir.entry(index) else {
                stats.skipped_entries += 1;
                continue;
            };
            let Some(meta) = &file.meta else {
                stats.skipped_entries += 1;
                continue;
            };

            let leaf = match &file.name {
                Some(name) => join_path(path, name),
                None => String::new(),
            };

            if meta.meta_type == MetaType::REGULAR {
                self.generate_file(partition, &file, &leaf, results);
                stats.files += 1;
            } else if meta.meta_type == MetaType::DIRECTORY {
                if let Some(name) = &file.name {
                    if name != "." && name != ".." {
                        pending.insert(meta.address, leaf);
                    }
                }
            }
        }
        drop(dir);

        Some(Frame {
            pending: pending.into_iter(),
            descending: None,
        })
    }
}
