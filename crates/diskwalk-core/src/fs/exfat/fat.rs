//! exFAT File Allocation Table (FAT) lookups and chain traversal
//!
//! Entries are read from the image on demand rather than loaded up front,
//! so a corrupt `fat_length` cannot force a huge allocation.
//!
//! FAT Entry Values:
//! - 0x00000000: Free cluster
//! - 0x00000001: Reserved
//! - 0x00000002-0xFFFFFFF6: Next cluster in chain
//! - 0xFFFFFFF7: Bad cluster
//! - 0xFFFFFFF8-0xFFFFFFFF: End of chain

use anyhow::Result;
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashSet;

use super::ExFatBootSector;
use crate::fs::common::DeviceRegion;

/// Special FAT entry values
pub const FAT_ENTRY_FREE: u32 = 0x00000000;
pub const FAT_ENTRY_BAD: u32 = 0xFFFFFFF7;
pub const FAT_ENTRY_EOC_MIN: u32 = 0xFFFFFFF8; // End of chain minimum

/// First cluster of the cluster heap
pub const FIRST_DATA_CLUSTER: u32 = 2;

/// exFAT File Allocation Table
#[derive(Clone)]
pub struct FatTable {
    region: DeviceRegion,
    /// Byte offset of the first FAT within the region
    fat_offset: u64,
    /// Number of addressable FAT entries (cluster count + 2)
    entry_count: u64,
    /// Bytes per cluster
    cluster_size: u64,
    /// Byte offset of the cluster heap within the region
    heap_offset: u64,
}

impl FatTable {
    pub fn new(region: DeviceRegion, boot: &ExFatBootSector) -> Self {
        let bytes_per_sector = u64::from(boot.bytes_per_sector());
        let fat_entries = u64::from(boot.fat_length) * bytes_per_sector / 4;

        FatTable {
            region,
            fat_offset: u64::from(boot.fat_offset) * bytes_per_sector,
            entry_count: fat_entries.min(u64::from(boot.cluster_count) + 2),
            cluster_size: u64::from(boot.bytes_per_cluster()),
            heap_offset: u64::from(boot.cluster_heap_offset) * bytes_per_sector,
        }
    }

    /// Cluster lies inside the heap and has a FAT entry
    pub fn is_valid_cluster(&self, cluster: u32) -> bool {
        cluster >= FIRST_DATA_CLUSTER && u64::from(cluster) < self.entry_count
    }

    /// Raw FAT entry for a cluster
    pub fn entry(&self, cluster: u32) -> Result<u32> {
        if !self.is_valid_cluster(cluster) {
            anyhow::bail!("Cluster {} outside the FAT", cluster);
        }
        let bytes = self
            .region
            .read_bytes(self.fat_offset + u64::from(cluster) * 4, 4)?;
        Ok(LittleEndian::read_u32(bytes))
    }

    /// Check if entry is end of chain
    pub fn is_end_of_chain(&self, entry: u32) -> bool {
        entry >= FAT_ENTRY_EOC_MIN
    }

    /// Get the next cluster in chain (None if end of chain or invalid)
    pub fn next_cluster(&self, cluster: u32) -> Option<u32> {
        let next = self.entry(cluster).ok()?;
        if (FIRST_DATA_CLUSTER..FAT_ENTRY_BAD).contains(&next) && self.is_valid_cluster(next) {
            Some(next)
        } else {
            None
        }
    }

    /// Cluster chain starting at `start_cluster`, at most `limit` clusters long
    pub fn get_chain(&self, start_cluster: u32, limit: usize) -> Vec<u32> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = start_cluster;

        while self.is_valid_cluster(current) && chain.len() < limit {
            if !visited.insert(current) {
                tracing::warn!("FAT chain loop detected at cluster {}", current);
                break;
            }
            chain.push(current);

            let next = match self.entry(current) {
                Ok(next) => next,
                Err(e) => {
                    tracing::debug!("FAT read failed at cluster {}: {}", current, e);
                    break;
                }
            };
            if self.is_end_of_chain(next) || next == FAT_ENTRY_FREE || next == FAT_ENTRY_BAD {
                break;
            }
            current = next;
        }

        chain
    }

    /// Contiguous run used by NoFatChain allocations
    pub fn contiguous_run(&self, start_cluster: u32, count: usize) -> Vec<u32> {
        (0..count as u64)
            .map_while(|i| u32::try_from(u64::from(start_cluster) + i).ok())
            .take_while(|&cluster| self.is_valid_cluster(cluster))
            .collect()
    }

    /// Get cluster size in bytes
    pub fn cluster_size(&self) -> u64 {
        self.cluster_size
    }

    /// Byte offset of a cluster within the region
    pub fn cluster_offset(&self, cluster: u32) -> u64 {
        self.heap_offset + u64::from(cluster.saturating_sub(FIRST_DATA_CLUSTER)) * self.cluster_size
    }

    /// Cluster holding the byte at `offset`, if it lies in the heap
    pub fn cluster_at(&self, offset: u64) -> Option<u32> {
        let relative = offset.checked_sub(self.heap_offset)?;
        let cluster = u32::try_from(relative / self.cluster_size + 2).ok()?;
        self.is_valid_cluster(cluster).then_some(cluster)
    }

    /// Read whole clusters, concatenated in chain order
    pub fn read_clusters(&self, clusters: &[u32]) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(clusters.len() * self.cluster_size as usize);
        for &cluster in clusters {
            let bytes = self
                .region
                .read_bytes(self.cluster_offset(cluster), self.cluster_size as usize)?;
            data.extend_from_slice(bytes);
        }
        Ok(data)
    }
}
