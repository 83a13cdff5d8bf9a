//! Partition listing
use crate::backend::{Partition, PartitionFlags, Volume};
use crate::record::{PartitionRecord, UNKNOWN_INODES};

/// Classify a partition from its flags; meta wins over unallocated
pub fn partition_type(flags: PartitionFlags) -> &'static str {
    if flags.contains(PartitionFlags::META) {
        "meta"
    } else if flags.contains(PartitionFlags::UNALLOCATED) {
        "unallocated"
    } else {
        "normal"
    }
}

/// Build the listing row for one partition
///
/// A filesystem open is attempted on every partition. When it succeeds the
/// filesystem's own geometry replaces the partition table's; otherwise the
/// row is derived from the table alone and `inodes` is -1.
pub fn describe_partition(device: &str, volume: &dyn Volume, part: &Partition) -> PartitionRecord {
    let mut record = PartitionRecord {
        device: device.to_string(),
        partition: part.address,
        label: part.label.clone(),
        partition_type: partition_type(part.flags).to_string(),
        flags: 0,
        offset: 0,
        blocks_size: 0,
        blocks: 0,
        inodes: UNKNOWN_INODES,
    };

    match volume.open_filesystem(part) {
        Ok(fs) => {
            record.partition_type = fs.type_name().to_string();
            record.flags = fs.flags();
            record.offset = fs.offset();
            record.blocks_size = fs.block_size();
            record.blocks = fs.block_count();
            record.inodes = i64::try_from(fs.inode_count()).unwrap_or(i64::MAX);
        }
        Err(e) => {
            tracing::debug!(
                "{}: partition {} holds no readable filesystem: {}",
                device,
                part.address,
                e
            );
            record.offset = part.start.saturating_mul(volume.block_size());
            record.blocks_size = volume.block_size();
            record.blocks = part.length;
            record.inodes = UNKNOWN_INODES;
            record.flags = part.flags.bits();
        }
    }

    record
}
