use crate::config::FeatureFlag;

/// Allocatable-space policy for the non-Virtual-A/B metadata resize path
/// (spec.md §4.1): a retrofit device's dynamic-partition metadata replaces
/// the legacy static layout outright, so it may claim the whole super
/// partition, while a launch device without Virtual-A/B must leave half the
/// super partition free for the then-inactive slot's own dynamic partitions
/// (it cannot assume retrofit's "metadata already covers both slots"
/// layout). Grounded on the retrofit-vs-launch branch of
/// `UpdatePartitionMetadata` in `dynamic_partition_control_android.cc`, and
/// confirmed by spec.md §8 scenario 6 (retrofit accepts groups summing to
/// `S - block_size`, which a half-`S` limit would reject).
#[derive(Debug, Clone, Copy)]
pub enum AllocatableSpacePolicy {
    Launch,
    Retrofit,
}

impl AllocatableSpacePolicy {
    pub fn for_flag(flag: FeatureFlag) -> Self {
        if flag.is_retrofit() {
            AllocatableSpacePolicy::Retrofit
        } else {
            AllocatableSpacePolicy::Launch
        }
    }

    pub fn allocatable_space(self, super_partition_size: u64) -> u64 {
        match self {
            AllocatableSpacePolicy::Retrofit => super_partition_size,
            AllocatableSpacePolicy::Launch => super_partition_size / 2,
        }
    }
}
