use std::io::Read;

use crate::data::{Extent, ExtentList};
use crate::error::CoreResult;

use super::FileDescriptor;

/// Writes a logical stream of bytes into a sequence of extents on a block
/// device, advancing through the extent list as each fills up. Sparse holes
/// are skipped (nothing is written to them; the extent merely advances the
/// logical offset) since they read back as zero already.
pub struct ExtentWriter<'a> {
    fd: &'a mut dyn FileDescriptor,
    block_size: u64,
    extents: std::vec::IntoIter<Extent>,
    current: Option<Extent>,
    offset_in_current: u64,
}

impl<'a> ExtentWriter<'a> {
    pub fn new(fd: &'a mut dyn FileDescriptor, block_size: u64, extents: ExtentList) -> Self {
        ExtentWriter {
            fd,
            block_size,
            extents: extents.into_iter(),
            current: None,
            offset_in_current: 0,
        }
    }

    fn advance_to_next_extent(&mut self) -> CoreResult<bool> {
        match self.extents.next() {
            Some(extent) => {
                self.current = Some(extent);
                self.offset_in_current = 0;
                if !extent.is_sparse_hole() {
                    self.fd.seek(extent.start_block * self.block_size)?;
                }
                Ok(true)
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }

    /// Write `buf` across the remaining extents, failing if the extent list
    /// runs out before all of `buf` is consumed (the caller computed sizes
    /// incorrectly if that happens).
    pub fn write(&mut self, mut buf: &[u8]) -> CoreResult<()> {
        while !buf.is_empty() {
            if self.current.is_none() && !self.advance_to_next_extent()? {
                return Err(crate::error::CoreError::InvalidArgument(
                    "extent writer ran out of extents before input was consumed".into(),
                ));
            }
            let extent = self.current.unwrap();
            let extent_bytes = extent.num_blocks * self.block_size;
            let remaining_in_extent = extent_bytes - self.offset_in_current;
            let take = remaining_in_extent.min(buf.len() as u64) as usize;

            if extent.is_sparse_hole() {
                // Nothing to write; just advance past the hole logically.
            } else {
                super::write_all(self.fd, &buf[..take])?;
            }

            self.offset_in_current += take as u64;
            buf = &buf[take..];

            if self.offset_in_current >= extent_bytes {
                self.current = None;
            }
        }
        Ok(())
    }

    pub fn finish(mut self) -> CoreResult<()> {
        self.fd.flush()
    }
}

/// Reads a logical stream of bytes out of a sequence of extents (used for
/// SOURCE_COPY/SOURCE_BSDIFF source data and filesystem verification).
pub struct ExtentReader<'a> {
    fd: &'a mut dyn FileDescriptor,
    block_size: u64,
    extents: std::vec::IntoIter<Extent>,
    current: Option<Extent>,
    offset_in_current: u64,
}

impl<'a> ExtentReader<'a> {
    pub fn new(fd: &'a mut dyn FileDescriptor, block_size: u64, extents: ExtentList) -> Self {
        ExtentReader {
            fd,
            block_size,
            extents: extents.into_iter(),
            current: None,
            offset_in_current: 0,
        }
    }

    fn advance_to_next_extent(&mut self) -> CoreResult<bool> {
        match self.extents.next() {
            Some(extent) => {
                self.current = Some(extent);
                self.offset_in_current = 0;
                if !extent.is_sparse_hole() {
                    self.fd.seek(extent.start_block * self.block_size)?;
                }
                Ok(true)
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }

    pub fn read(&mut self, mut buf: &mut [u8]) -> CoreResult<usize> {
        let mut total = 0;
        while !buf.is_empty() {
            if self.current.is_none() && !self.advance_to_next_extent()? {
                break;
            }
            let extent = self.current.unwrap();
            let extent_bytes = extent.num_blocks * self.block_size;
            let remaining_in_extent = extent_bytes - self.offset_in_current;
            let take = remaining_in_extent.min(buf.len() as u64) as usize;

            if extent.is_sparse_hole() {
                for b in &mut buf[..take] {
                    *b = 0;
                }
            } else {
                crate::io::read_exact(self.fd, &mut buf[..take])?;
            }

            self.offset_in_current += take as u64;
            total += take;
            buf = &mut buf[take..];

            if self.offset_in_current >= extent_bytes {
                self.current = None;
            }
        }
        Ok(total)
    }
}

impl<'a> Read for ExtentReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        ExtentReader::read(self, buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::error::{CoreError, CoreResult};
    use crate::io::FileDescriptor;

    /// In-memory block device double so executor/extent tests don't need a
    /// real file or root privileges.
    pub struct MemFileDescriptor {
        data: Vec<u8>,
        pos: u64,
    }

    impl MemFileDescriptor {
        pub fn new(size: usize) -> Self {
            MemFileDescriptor {
                data: vec![0u8; size],
                pos: 0,
            }
        }

        pub fn contents(&self) -> &[u8] {
            &self.data
        }
    }

    impl FileDescriptor for MemFileDescriptor {
        fn open(&mut self, _path: &str, _flags: i32) -> CoreResult<()> {
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> CoreResult<usize> {
            let pos = self.pos as usize;
            let n = buf.len().min(self.data.len().saturating_sub(pos));
            buf[..n].copy_from_slice(&self.data[pos..pos + n]);
            self.pos += n as u64;
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> CoreResult<usize> {
            let pos = self.pos as usize;
            if pos + buf.len() > self.data.len() {
                self.data.resize(pos + buf.len(), 0);
            }
            self.data[pos..pos + buf.len()].copy_from_slice(buf);
            self.pos += buf.len() as u64;
            Ok(buf.len())
        }

        fn seek(&mut self, offset: u64) -> CoreResult<u64> {
            if offset as usize > self.data.len() {
                return Err(CoreError::InvalidArgument("seek past end of memory device".into()));
            }
            self.pos = offset;
            Ok(self.pos)
        }

        fn block_device_size(&mut self) -> CoreResult<u64> {
            Ok(self.data.len() as u64)
        }

        fn flush(&mut self) -> CoreResult<()> {
            Ok(())
        }

        fn close(&mut self) -> CoreResult<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::test_support::MemFileDescriptor;
    use super::*;

    #[test]
    fn writer_advances_through_multiple_extents() {
        let mut mem = MemFileDescriptor::new(16);
        let extents = ExtentList::from_vec(vec![Extent::new(0, 1), Extent::new(2, 1)]);
        {
            let mut writer = ExtentWriter::new(&mut mem, 4, extents);
            writer.write(b"abcdefgh").unwrap();
            writer.finish().unwrap();
        }
        assert_eq!(&mem.contents()[0..4], b"abcd");
        assert_eq!(&mem.contents()[8..12], b"efgh");
    }

    #[test]
    fn reader_zero_fills_sparse_holes() {
        let mut mem = MemFileDescriptor::new(8);
        mem.write(b"xxxxxxxx").unwrap();
        mem.seek(0).unwrap();
        let extents = ExtentList::from_vec(vec![Extent::new(crate::data::SPARSE_HOLE, 1)]);
        let mut reader = ExtentReader::new(&mut mem, 4, extents);
        let mut buf = [0xffu8; 4];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf, [0, 0, 0, 0]);
    }
}
