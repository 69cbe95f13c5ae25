/// Disk/memory requirements for scheduled tasks, computed from declared
/// artifact sizes at graph-construction time.

use crate::config::defs::{
    CALL_TASK_MEMORY_BYTES, DEFAULT_ALIGNMENT_DISK_MULTIPLIER, DEFAULT_REFERENCE_DISK_MULTIPLIER,
    LIGHT_TASK_DISK_BYTES, LIGHT_TASK_MEMORY_BYTES,
};
use crate::utils::artifact::DeclaredSize;

const MIB: u64 = 1_048_576;

/// Per-kind disk multipliers. The reference archive is decompressed into
/// multiple on-disk copies during a calling run, so it weighs far more
/// than the alignment it is read against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeMultipliers {
    pub alignment: u64,
    pub reference: u64,
}

impl Default for SizeMultipliers {
    fn default() -> Self {
        SizeMultipliers {
            alignment: DEFAULT_ALIGNMENT_DISK_MULTIPLIER,
            reference: DEFAULT_REFERENCE_DISK_MULTIPLIER,
        }
    }
}

/// What one scheduled task asks of the executor before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskResources {
    pub disk_bytes: u64,
    pub memory_bytes: u64,
}

impl TaskResources {
    /// Profile for a per-chromosome calling or filtering run.
    pub fn call(disk_bytes: u64) -> Self {
        TaskResources {
            disk_bytes,
            memory_bytes: CALL_TASK_MEMORY_BYTES,
        }
    }

    /// Profile for the whole-alignment preprocessing and merge runs.
    pub fn light() -> Self {
        TaskResources {
            disk_bytes: LIGHT_TASK_DISK_BYTES,
            memory_bytes: LIGHT_TASK_MEMORY_BYTES,
        }
    }
}

/// Disk needed by one per-chromosome calling run.
///
/// Pure function of the declared sizes of the RNA alignment and the
/// reference archive; works identically on resolved handles and still
/// deferred ones, so requirements can be computed before anything has
/// run. Saturating, rounded up to a whole mebibyte.
pub fn estimate_call_disk(
    alignment: &dyn DeclaredSize,
    reference: &dyn DeclaredSize,
    multipliers: &SizeMultipliers,
) -> u64 {
    let weighted = alignment
        .declared_size()
        .saturating_mul(multipliers.alignment)
        .saturating_add(reference.declared_size().saturating_mul(multipliers.reference));

    // Round up to the next MiB
    weighted.div_ceil(MIB).saturating_mul(MIB)
}
