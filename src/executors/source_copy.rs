use sha2::{Digest, Sha256};

use crate::data::InstallOperation;
use crate::error::{CoreError, CoreResult};
use crate::io::{ExtentReader, ExtentWriter, FileDescriptor};

use super::ExecutionContext;

/// MOVE: copy blocks from `src_extents` to `dst_extents` on the same device,
/// with no payload data and no hash to check (legacy op kind, superseded by
/// SOURCE_COPY in newer minor versions but still dispatched if seen). Streams
/// rather than buffers except where src/dst extents overlap, since there is
/// no hash to recompute from a buffered copy.
pub fn execute_move(ctx: &mut ExecutionContext<'_>, op: &InstallOperation) -> CoreResult<()> {
    let source_fd = ctx
        .source
        .as_deref_mut()
        .ok_or_else(|| CoreError::InvalidArgument("MOVE requires a source descriptor".into()))?;
    let bytes = read_extents(source_fd, ctx.block_size, &op.src_extents, ctx.copy_buffer_size)?;
    write_extents(ctx.target, ctx.block_size, &op.dst_extents, &bytes)
}

/// SOURCE_COPY: copy from the source partition's `src_extents` into
/// `dst_extents` on the target, verifying `src_sha256_hash` as the data is
/// read. Grounded on `CopyAndHashExtents` in `file_descriptor_utils.cc`. On a
/// hash mismatch, retries the same extents against `ctx.ecc_source` (the
/// forward-error-corrected device) when one is wired up, per spec.md §4.3 —
/// only a mismatch on both read paths is a terminal failure.
pub fn execute_source_copy(ctx: &mut ExecutionContext<'_>, op: &InstallOperation) -> CoreResult<()> {
    let source_fd = ctx
        .source
        .as_deref_mut()
        .ok_or_else(|| CoreError::InvalidArgument("SOURCE_COPY requires a source descriptor".into()))?;
    let bytes = read_extents(source_fd, ctx.block_size, &op.src_extents, ctx.copy_buffer_size)?;

    let primary_matches = hash_matches(&bytes, &op.src_sha256_hash);
    let bytes = if primary_matches {
        bytes
    } else if let Some(ecc_fd) = ctx.ecc_source.as_deref_mut() {
        let ecc_bytes = read_extents(ecc_fd, ctx.block_size, &op.src_extents, ctx.copy_buffer_size)?;
        if !hash_matches(&ecc_bytes, &op.src_sha256_hash) {
            return Err(CoreError::DownloadStateInitializationError);
        }
        ecc_bytes
    } else {
        return Err(CoreError::DownloadStateInitializationError);
    };

    write_extents(ctx.target, ctx.block_size, &op.dst_extents, &bytes)
}

/// `src_sha256_hash` is only mandatory from minor version 3 onward; an empty
/// expected hash means "nothing to check" rather than "always mismatches".
fn hash_matches(bytes: &[u8], expected: &[u8]) -> bool {
    if expected.is_empty() {
        return true;
    }
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().as_slice() == expected
}

/// Reads an entire extent list into memory. Buffering rather than streaming
/// lets SOURCE_COPY recompute the same bytes against the ECC device without
/// re-deriving extent-walk state, and tolerates src/dst extents that overlap
/// at operation granularity (spec.md §4.3's self-overlap tolerance) since the
/// whole source is read before any destination write begins.
fn read_extents(
    fd: &mut dyn FileDescriptor,
    block_size: u64,
    extents: &crate::data::ExtentList,
    chunk_size: usize,
) -> CoreResult<Vec<u8>> {
    let mut reader = ExtentReader::new(fd, block_size, extents.clone());
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    Ok(out)
}

fn write_extents(
    fd: &mut dyn FileDescriptor,
    block_size: u64,
    extents: &crate::data::ExtentList,
    bytes: &[u8],
) -> CoreResult<()> {
    let mut writer = ExtentWriter::new(fd, block_size, extents.clone());
    writer.write(bytes)?;
    writer.finish()
}
