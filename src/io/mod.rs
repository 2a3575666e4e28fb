//! Extent & Block I/O layer (spec.md §4.5): the `FileDescriptor` trait
//! family and the `ExtentWriter`/`ExtentReader` adapters built on top of it.

mod cached_fd;
mod cow_fd;
mod direct_fd;
pub(crate) mod extent_io;

pub use cached_fd::CachedFileDescriptor;
pub use cow_fd::{open_cow_writer, CowWriterFileDescriptor};
pub use direct_fd::DirectFileDescriptor;
pub use extent_io::{ExtentReader, ExtentWriter};

use crate::error::CoreResult;

/// A seekable, readable/writable block device or file, abstracted so the
/// executors can run identically against a real block device, a COW writer,
/// or an in-memory test double.
pub trait FileDescriptor: Send {
    fn open(&mut self, path: &str, flags: i32) -> CoreResult<()>;
    fn read(&mut self, buf: &mut [u8]) -> CoreResult<usize>;
    fn write(&mut self, buf: &[u8]) -> CoreResult<usize>;
    fn seek(&mut self, offset: u64) -> CoreResult<u64>;
    fn block_device_size(&mut self) -> CoreResult<u64>;
    fn flush(&mut self) -> CoreResult<()>;
    fn close(&mut self) -> CoreResult<()>;

    /// Best-effort: discard the tail past `pos` using BLKDISCARD /
    /// BLKSECDISCARD / BLKZEROOUT in sequence, falling back silently.
    /// Grounded on `DiscardPartitionTail` in `partition_writer.cc`.
    fn discard_tail(&mut self, _pos: u64) -> CoreResult<()> {
        Ok(())
    }
}

/// Read exactly `buf.len()` bytes or return an I/O error, the way the
/// executors need full extents rather than short reads.
pub fn read_exact(fd: &mut dyn FileDescriptor, mut buf: &mut [u8]) -> CoreResult<()> {
    while !buf.is_empty() {
        let n = fd.read(buf)?;
        if n == 0 {
            return Err(crate::error::CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short read while filling buffer",
            )));
        }
        buf = &mut buf[n..];
    }
    Ok(())
}

pub fn write_all(fd: &mut dyn FileDescriptor, mut buf: &[u8]) -> CoreResult<()> {
    while !buf.is_empty() {
        let n = fd.write(buf)?;
        if n == 0 {
            return Err(crate::error::CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write returned 0",
            )));
        }
        buf = &buf[n..];
    }
    Ok(())
}
