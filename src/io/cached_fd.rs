use crate::error::CoreResult;

use super::FileDescriptor;

/// Wraps a `FileDescriptor` with a fixed-size write cache, flushed once it
/// fills or on explicit `flush()`. Grounded on `CachedFileDescriptor` in
/// `verity_writer_android.cc`/`file_descriptor_utils.cc`, used there to
/// batch small verity/FEC writes into 1 MiB chunks instead of hitting the
/// block device on every call.
pub struct CachedFileDescriptor<F: FileDescriptor> {
    inner: F,
    cache: Vec<u8>,
    cache_size: usize,
    cache_start: u64,
    position: u64,
}

impl<F: FileDescriptor> CachedFileDescriptor<F> {
    pub fn new(inner: F, cache_size: usize) -> Self {
        CachedFileDescriptor {
            inner,
            cache: Vec::with_capacity(cache_size),
            cache_size,
            cache_start: 0,
            position: 0,
        }
    }

    fn flush_cache(&mut self) -> CoreResult<()> {
        if self.cache.is_empty() {
            return Ok(());
        }
        self.inner.seek(self.cache_start)?;
        super::write_all(&mut self.inner, &self.cache)?;
        self.cache.clear();
        Ok(())
    }
}

impl<F: FileDescriptor> FileDescriptor for CachedFileDescriptor<F> {
    fn open(&mut self, path: &str, flags: i32) -> CoreResult<()> {
        self.inner.open(path, flags)
    }

    fn read(&mut self, buf: &mut [u8]) -> CoreResult<usize> {
        self.flush_cache()?;
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> CoreResult<usize> {
        if self.cache.is_empty() {
            self.cache_start = self.position;
        }
        self.cache.extend_from_slice(buf);
        self.position += buf.len() as u64;
        if self.cache.len() >= self.cache_size {
            self.flush_cache()?;
        }
        Ok(buf.len())
    }

    fn seek(&mut self, offset: u64) -> CoreResult<u64> {
        self.flush_cache()?;
        self.position = self.inner.seek(offset)?;
        Ok(self.position)
    }

    fn block_device_size(&mut self) -> CoreResult<u64> {
        self.inner.block_device_size()
    }

    fn flush(&mut self) -> CoreResult<()> {
        self.flush_cache()?;
        self.inner.flush()
    }

    fn close(&mut self) -> CoreResult<()> {
        self.flush_cache()?;
        self.inner.close()
    }

    fn discard_tail(&mut self, pos: u64) -> CoreResult<()> {
        self.flush_cache()?;
        self.inner.discard_tail(pos)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::extent_io::test_support::MemFileDescriptor;

    #[test]
    fn writes_below_threshold_are_buffered_until_flush() {
        let mem = MemFileDescriptor::new(1024);
        let mut cached = CachedFileDescriptor::new(mem, 64);
        cached.write(b"hello").unwrap();
        // Not yet flushed to the inner descriptor.
        assert_eq!(cached.cache.len(), 5);
        cached.flush().unwrap();
        assert!(cached.cache.is_empty());
    }

    #[test]
    fn write_past_cache_size_flushes_automatically() {
        let mem = MemFileDescriptor::new(1024);
        let mut cached = CachedFileDescriptor::new(mem, 4);
        cached.write(b"hello").unwrap();
        assert!(cached.cache.is_empty());
    }
}
