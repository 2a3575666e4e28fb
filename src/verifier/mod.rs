//! Filesystem Verifier (spec.md §4.4): re-hashes a partition's written
//! bytes in fixed-size chunks and compares against the manifest's declared
//! hash, branching between source-partition and target-partition checks the
//! way `FilesystemVerifierAction` does (source mismatch implies the device
//! wasn't in the expected starting state; target mismatch after a
//! successful source check implies the update itself is broken).

use sha2::{Digest, Sha256};

use crate::data::PartitionUpdate;
use crate::error::{CoreError, CoreResult};
use crate::io::FileDescriptor;

/// Chunk size for re-hash reads, matching `kReadFileBufferSize` in
/// `filesystem_verifier_action.cc`.
pub const READ_FILE_BUFFER_SIZE: usize = 128 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyTarget {
    Source,
    Target,
}

pub struct FilesystemVerifier {
    chunk_size: usize,
}

impl FilesystemVerifier {
    pub fn new(chunk_size: usize) -> Self {
        FilesystemVerifier { chunk_size }
    }

    pub fn default_config() -> Self {
        FilesystemVerifier::new(READ_FILE_BUFFER_SIZE)
    }

    /// Re-hashes `size` bytes from `fd` (already seeked to the start of the
    /// partition) and compares against `expected_hash`, returning the
    /// appropriate terminal error for whichever side mismatched.
    pub fn verify(
        &self,
        fd: &mut dyn FileDescriptor,
        size: u64,
        expected_hash: &[u8],
        which: VerifyTarget,
    ) -> CoreResult<()> {
        if expected_hash.is_empty() {
            return Ok(());
        }

        let mut hasher = Sha256::new();
        let mut remaining = size;
        let mut buf = vec![0u8; self.chunk_size];
        while remaining > 0 {
            let want = (remaining as usize).min(buf.len());
            let n = fd.read(&mut buf[..want])?;
            if n == 0 {
                return Err(CoreError::FilesystemVerifierError(
                    "unexpected end of partition while verifying".into(),
                ));
            }
            hasher.update(&buf[..n]);
            remaining -= n as u64;
        }

        let digest = hasher.finalize();
        if digest.as_slice() != expected_hash {
            return Err(match which {
                VerifyTarget::Source => CoreError::DownloadStateInitializationError,
                VerifyTarget::Target => CoreError::NewRootfsVerificationError,
            });
        }
        Ok(())
    }

    pub fn verify_partition_source(
        &self,
        fd: &mut dyn FileDescriptor,
        partition: &PartitionUpdate,
    ) -> CoreResult<()> {
        let (size, hash) = match (partition.old_partition_size, &partition.old_partition_hash) {
            (Some(size), Some(hash)) => (size, hash.as_slice()),
            _ => return Ok(()),
        };
        fd.seek(0)?;
        self.verify(fd, size, hash, VerifyTarget::Source)
    }

    pub fn verify_partition_target(
        &self,
        fd: &mut dyn FileDescriptor,
        partition: &PartitionUpdate,
    ) -> CoreResult<()> {
        fd.seek(0)?;
        self.verify(
            fd,
            partition.new_partition_size,
            &partition.new_partition_hash,
            VerifyTarget::Target,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::extent_io::test_support::MemFileDescriptor;

    #[test]
    fn verify_passes_for_matching_hash() {
        let mut mem = MemFileDescriptor::new(8);
        mem.write(b"abcdefgh").unwrap();
        mem.seek(0).unwrap();

        let mut hasher = Sha256::new();
        hasher.update(b"abcdefgh");
        let expected = hasher.finalize();

        let verifier = FilesystemVerifier::new(4);
        verifier
            .verify(&mut mem, 8, expected.as_slice(), VerifyTarget::Target)
            .unwrap();
    }

    #[test]
    fn mismatch_on_target_returns_rootfs_error() {
        let mut mem = MemFileDescriptor::new(8);
        mem.write(b"abcdefgh").unwrap();
        mem.seek(0).unwrap();

        let verifier = FilesystemVerifier::new(4);
        let err = verifier
            .verify(&mut mem, 8, &[0u8; 32], VerifyTarget::Target)
            .unwrap_err();
        assert!(matches!(err, CoreError::NewRootfsVerificationError));
    }

    #[test]
    fn mismatch_on_source_returns_state_initialization_error() {
        let mut mem = MemFileDescriptor::new(8);
        mem.write(b"abcdefgh").unwrap();
        mem.seek(0).unwrap();

        let verifier = FilesystemVerifier::new(4);
        let err = verifier
            .verify(&mut mem, 8, &[0u8; 32], VerifyTarget::Source)
            .unwrap_err();
        assert!(matches!(err, CoreError::DownloadStateInitializationError));
    }
}
