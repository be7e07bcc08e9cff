//! Partition inventory consulted by `ReadModifyWriteLower`
//!
//! A loader fills one `PartitionInfo` per physical partition before the
//! satellite core runs its first program; the table is read-only afterwards.

/// Maximum number of partitions a satellite core can serve
pub const MAX_PARTITIONS: usize = 16;

/// Inventory record of one physical partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionInfo {
    /// The lower sub-partition is not populated
    pub half_subpartition: bool,
    pub partition_index: u8,
}

impl PartitionInfo {
    pub fn full(partition_index: u8) -> Self {
        PartitionInfo {
            half_subpartition: false,
            partition_index,
        }
    }

    pub fn half(partition_index: u8) -> Self {
        PartitionInfo {
            half_subpartition: true,
            partition_index,
        }
    }

    /// Whether `ReadModifyWriteLower` applies on this partition
    pub fn has_lower_subpartition(&self) -> bool {
        !self.half_subpartition
    }
}

/// Fixed, statically sized partition table
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionTable {
    entries: [Option<PartitionInfo>; MAX_PARTITIONS],
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a partition; returns false if its index is outside the table
    pub fn install(&mut self, info: PartitionInfo) -> bool {
        match self.entries.get_mut(info.partition_index as usize) {
            Some(slot) => {
                *slot = Some(info);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, partition_index: u8) -> Option<PartitionInfo> {
        self.entries
            .get(partition_index as usize)
            .copied()
            .flatten()
    }

    /// Installed partitions in index order
    pub fn iter(&self) -> impl Iterator<Item = PartitionInfo> + '_ {
        self.entries.iter().filter_map(|entry| *entry)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
