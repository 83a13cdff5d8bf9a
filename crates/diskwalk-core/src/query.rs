//! Query entry points
//!
//! Both queries open a fresh [`DeviceAccessor`] per device and never fail:
//! anything unreadable yields fewer records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::accessor::DeviceAccessor;
use crate::backend::ForensicBackend;
use crate::config::WalkConfig;
use crate::error::QueryError;
use crate::lookup::{lookup_inode, lookup_path};
use crate::partitions::describe_partition;
use crate::record::{FileRecord, PartitionRecord};
use crate::walker::TreeWalker;

/// Devices to list partitions for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionQuery {
    pub devices: BTreeSet<String>,
}

/// Filters of a file listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileQuery {
    pub devices: BTreeSet<String>,
    /// Partition addresses; exactly one is required
    pub partitions: BTreeSet<String>,
    pub paths: BTreeSet<String>,
    /// Decimal inode addresses
    pub inodes: BTreeSet<String>,
}

impl FileQuery {
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.devices.is_empty() {
            return Err(QueryError::NoDevices);
        }
        if self.partitions.len() != 1 {
            return Err(QueryError::PartitionFilter {
                count: self.partitions.len(),
            });
        }
        Ok(())
    }

    /// Neither paths nor inodes were given, so the whole tree is wanted
    pub fn is_full_walk(&self) -> bool {
        self.paths.is_empty() && self.inodes.is_empty()
    }
}

/// One record per partition per device
pub fn list_partitions(backend: &dyn ForensicBackend, query: &PartitionQuery) -> Vec<PartitionRecord> {
    let mut results = Vec::new();

    for device in &query.devices {
        let mut accessor = DeviceAccessor::new(backend, device.as_str());
        accessor.partitions(|volume, part| {
            results.push(describe_partition(device, volume, part));
        });
    }

    tracing::info!(
        "Listed {} partitions across {} devices",
        results.len(),
        query.devices.len()
    );
    results
}

/// Files of one partition on each device
///
/// Without path or inode filters the partition is walked from its root;
/// otherwise only the requested paths and inodes are looked up.
pub fn list_files(
    backend: &dyn ForensicBackend,
    query: &FileQuery,
    config: &WalkConfig,
) -> Vec<FileRecord> {
    if let Err(e) = query.validate() {
        tracing::warn!("{}", e);
        return Vec::new();
    }
    let Some(wanted) = query.partitions.first() else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for device in &query.devices {
        let mut accessor = DeviceAccessor::new(backend, device.as_str());
        let mut walker = TreeWalker::new(device.as_str(), config);

        accessor.partitions(|volume, part| {
            let address = part.address.to_string();
            if &address != wanted {
                return;
            }

            let fs = match volume.open_filesystem(part) {
                Ok(fs) => fs,
                Err(e) => {
                    tracing::debug!("{}: partition {}: {}", device, address, e);
                    return;
                }
            };

            if query.is_full_walk() {
                walker.reset();
                let stats = walker.generate_files(&address, fs.as_ref(), "/", 0, &mut results);
                walker.reset();
                tracing::info!(
                    "{}: partition {} ({}): {} files in {} directories, {} entries skipped",
                    device,
                    address,
                    fs.type_name(),
                    stats.files,
                    stats.directories,
                    stats.skipped_entries
                );
            }

            for path in &query.paths {
                lookup_path(&walker, &address, fs.as_ref(), path, &mut results);
            }
            for inode in &query.inodes {
                lookup_inode(&walker, &address, fs.as_ref(), inode, &mut results);
            }
        });
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(devices: &[&str], partitions: &[&str]) -> FileQuery {
        FileQuery {
            devices: devices.iter().map(|s| s.to_string()).collect(),
            partitions: partitions.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate() {
        assert_eq!(query(&[], &["1"]).validate(), Err(QueryError::NoDevices));
        assert_eq!(
            query(&["/dev/sda"], &[]).validate(),
            Err(QueryError::PartitionFilter { count: 0 })
        );
        assert_eq!(
            query(&["/dev/sda"], &["1", "2"]).validate(),
            Err(QueryError::PartitionFilter { count: 2 })
        );
        assert!(query(&["/dev/sda"], &["1"]).validate().is_ok());
        // Filters are sets: a repeated partition is still one partition
        assert!(query(&["/dev/sda"], &["1", "1"]).validate().is_ok());
    }

    #[test]
    fn test_is_full_walk() {
        let mut q = query(&["/dev/sda"], &["1"]);
        assert!(q.is_full_walk());
        q.inodes.insert("12".to_string());
        assert!(!q.is_full_walk());
    }
}
