//! Operation Executors (spec.md §4.3): one executor per `OperationKind`,
//! dispatched from the Delta Performer as each operation is read off the
//! wire. Executors share the `ExecutionContext` below so the extent I/O,
//! config, and collaborator handles don't have to be threaded through every
//! call individually.

mod diff;
mod replace;
mod source_copy;

use sha2::{Digest, Sha256};

use crate::data::{ExtentList, InstallOperation, OperationKind};
use crate::error::{CoreError, CoreResult};
use crate::io::FileDescriptor;

/// Bundles the handles an executor needs: the target device to write into,
/// an optional source device to read from (present for SOURCE_* ops and
/// absent otherwise), an optional error-corrected (FEC) source device to
/// retry against when `src_sha256_hash` doesn't match the primary source
/// read (spec.md §4.3's SOURCE_COPY ECC fallback), and sizing knobs from
/// `CoreConfig`.
pub struct ExecutionContext<'a> {
    pub target: &'a mut dyn FileDescriptor,
    pub source: Option<&'a mut dyn FileDescriptor>,
    pub ecc_source: Option<&'a mut dyn FileDescriptor>,
    pub block_size: u64,
    pub copy_buffer_size: usize,
    pub puffin_cache_limit: usize,
}

/// Runs one operation's extent-level side effects: decodes/copies/patches
/// `op.data` (if present) into `op.dst_extents`, verifying hashes per
/// spec.md §7 as it goes.
pub fn execute_operation(ctx: &mut ExecutionContext<'_>, op: &InstallOperation, data: &[u8]) -> CoreResult<()> {
    if op.kind.has_payload_data() {
        verify_data_hash(op, data)?;
    }

    match op.kind {
        OperationKind::Replace => replace::execute_replace(ctx, op, data),
        OperationKind::ReplaceBz => replace::execute_replace_bz(ctx, op, data),
        OperationKind::ReplaceXz => replace::execute_replace_xz(ctx, op, data),
        OperationKind::Zero => replace::execute_zero(ctx, op),
        OperationKind::Discard => replace::execute_discard(ctx, op),
        OperationKind::Move => source_copy::execute_move(ctx, op),
        OperationKind::SourceCopy => source_copy::execute_source_copy(ctx, op),
        OperationKind::Bsdiff | OperationKind::SourceBsdiff => diff::execute_bsdiff(ctx, op, data),
        OperationKind::BrotliBsdiff => diff::execute_brotli_bsdiff(ctx, op, data),
        OperationKind::Puffdiff => diff::execute_puffdiff(ctx, op, data),
    }
}

fn verify_data_hash(op: &InstallOperation, data: &[u8]) -> CoreResult<()> {
    if op.data_sha256_hash.is_empty() {
        return Err(CoreError::DownloadOperationHashMissing);
    }
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    if digest.as_slice() != op.data_sha256_hash.as_slice() {
        return Err(CoreError::DownloadOperationHashMismatch);
    }
    Ok(())
}

/// Whether `src_extents` and `dst_extents` share any block range, which the
/// SOURCE_COPY/SOURCE_BSDIFF executors must tolerate by buffering the whole
/// source before writing the target (spec.md §4.3 self-overlap tolerance).
pub(crate) fn extents_overlap(src: &ExtentList, dst: &ExtentList) -> bool {
    for s in src.iter() {
        if s.is_sparse_hole() {
            continue;
        }
        let s_end = s.start_block + s.num_blocks;
        for d in dst.iter() {
            if d.is_sparse_hole() {
                continue;
            }
            let d_end = d.start_block + d.num_blocks;
            if s.start_block < d_end && d.start_block < s_end {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::Extent;

    #[test]
    fn detects_overlapping_extents() {
        let src = ExtentList::from_vec(vec![Extent::new(0, 4)]);
        let dst = ExtentList::from_vec(vec![Extent::new(2, 4)]);
        assert!(extents_overlap(&src, &dst));

        let dst2 = ExtentList::from_vec(vec![Extent::new(10, 4)]);
        assert!(!extents_overlap(&src, &dst2));
    }
}
