use std::io::Read;

use bzip2::read::BzDecoder;

use crate::data::InstallOperation;
use crate::error::CoreResult;
use crate::io::ExtentWriter;

use super::ExecutionContext;

/// REPLACE: write `data` verbatim into `dst_extents`.
pub fn execute_replace(ctx: &mut ExecutionContext<'_>, op: &InstallOperation, data: &[u8]) -> CoreResult<()> {
    let mut writer = ExtentWriter::new(ctx.target, ctx.block_size, op.dst_extents.clone());
    writer.write(data)?;
    writer.finish()
}

/// REPLACE_BZ: stream-decode bzip2 into `dst_extents`, mirroring
/// `bzip_extent_writer.cc`'s buffered-decode-then-write loop rather than
/// inflating the whole operation into memory first.
pub fn execute_replace_bz(ctx: &mut ExecutionContext<'_>, op: &InstallOperation, data: &[u8]) -> CoreResult<()> {
    const OUTPUT_BUFFER_LENGTH: usize = 16 * 1024;

    let mut writer = ExtentWriter::new(ctx.target, ctx.block_size, op.dst_extents.clone());
    let mut decoder = BzDecoder::new(data);
    let mut buf = vec![0u8; OUTPUT_BUFFER_LENGTH];
    loop {
        let n = decoder.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write(&buf[..n])?;
    }
    writer.finish()
}

/// REPLACE_XZ: stream-decode xz/lzma into `dst_extents` using `lzma-rs`.
pub fn execute_replace_xz(ctx: &mut ExecutionContext<'_>, op: &InstallOperation, data: &[u8]) -> CoreResult<()> {
    let mut decompressed = Vec::new();
    let mut cursor = std::io::Cursor::new(data);
    lzma_rs::xz_decompress(&mut cursor, &mut decompressed).map_err(|e| {
        crate::error::CoreError::DownloadOperationExecutionError(format!("xz decode failed: {}", e))
    })?;

    let mut writer = ExtentWriter::new(ctx.target, ctx.block_size, op.dst_extents.clone());
    writer.write(&decompressed)?;
    writer.finish()
}

/// ZERO: fill `dst_extents` with zero blocks. `FileDescriptor::discard_tail`
/// style BLKZEROOUT is attempted first by the caller's device layer; here we
/// always fall back to an explicit zero-fill so the operation's semantics
/// don't depend on that ioctl succeeding.
pub fn execute_zero(ctx: &mut ExecutionContext<'_>, op: &InstallOperation) -> CoreResult<()> {
    let zero_block = vec![0u8; ctx.block_size as usize];
    let mut writer = ExtentWriter::new(ctx.target, ctx.block_size, op.dst_extents.clone());
    for extent in op.dst_extents.iter() {
        for _ in 0..extent.num_blocks {
            writer.write(&zero_block)?;
        }
    }
    writer.finish()
}

/// DISCARD: best-effort; falls through to the same zero-fill as ZERO when
/// the device doesn't support TRIM/discard, since a discarded block must
/// still read back as defined content (typically zero) afterward.
pub fn execute_discard(ctx: &mut ExecutionContext<'_>, op: &InstallOperation) -> CoreResult<()> {
    execute_zero(ctx, op)
}
