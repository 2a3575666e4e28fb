use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};
use crate::io::{write_all, FileDescriptor};

/// Builds a dm-verity hash tree bottom-up: the data blocks form level 0,
/// each subsequent level hashes `hashes_per_block` digests from the level
/// below (padded with zeros to a block boundary, as dm-verity requires),
/// until a single root digest remains.
///
/// Mirrors `VerityWriterAndroid::Init/Update/Finalize` in
/// `verity_writer_android.cc`: `Update` is called incrementally as data
/// blocks are written, `Finalize` produces the completed tree and root hash.
pub struct HashTreeBuilder {
    block_size: usize,
    salt: Vec<u8>,
    level0: Vec<u8>,
    data_blocks_seen: u64,
    expected_data_blocks: u64,
}

impl HashTreeBuilder {
    pub fn new(block_size: usize, salt: Vec<u8>, expected_data_blocks: u64) -> Self {
        HashTreeBuilder {
            block_size,
            salt,
            level0: Vec::new(),
            data_blocks_seen: 0,
            expected_data_blocks,
        }
    }

    fn digest_size(&self) -> usize {
        32 // SHA-256
    }

    fn hashes_per_block(&self) -> usize {
        self.block_size / self.digest_size()
    }

    fn block_digest(&self, block: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.salt);
        hasher.update(block);
        hasher.finalize().into()
    }

    /// Feed one block of partition data (must be exactly `block_size`
    /// bytes, except the final call which may be shorter and is zero-padded).
    pub fn update(&mut self, block: &[u8]) -> CoreResult<()> {
        if block.len() > self.block_size {
            return Err(CoreError::VerityCalculationError(format!(
                "block of {} bytes exceeds configured block size {}",
                block.len(),
                self.block_size
            )));
        }
        let mut padded = vec![0u8; self.block_size];
        padded[..block.len()].copy_from_slice(block);
        let digest = self.block_digest(&padded);
        self.level0.extend_from_slice(&digest);
        self.data_blocks_seen += 1;
        Ok(())
    }

    /// Builds the remaining levels above level 0 and returns
    /// `(root_hash, tree_bytes)` where `tree_bytes` is every level above
    /// level 0 serialized bottom-up, the layout dm-verity expects on disk.
    pub fn finalize(mut self) -> CoreResult<(Vec<u8>, Vec<u8>)> {
        if self.data_blocks_seen != self.expected_data_blocks {
            return Err(CoreError::VerityCalculationError(format!(
                "expected {} data blocks, saw {}",
                self.expected_data_blocks, self.data_blocks_seen
            )));
        }

        let mut tree = Vec::new();
        let mut level = self.level0;
        let hashes_per_block = self.hashes_per_block();
        let digest_size = self.digest_size();

        loop {
            let num_hashes = level.len() / digest_size;
            if num_hashes <= 1 {
                let root = level[..digest_size].to_vec();
                return Ok((root, tree));
            }

            let mut next_level = Vec::new();
            for chunk in level.chunks(hashes_per_block * digest_size) {
                let mut padded_block = vec![0u8; self.block_size];
                padded_block[..chunk.len()].copy_from_slice(chunk);
                let digest = self.block_digest_for_tree(&padded_block);
                next_level.extend_from_slice(&digest);
                tree.extend_from_slice(&padded_block);
            }
            level = next_level;
        }
    }

    fn block_digest_for_tree(&self, block: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.salt);
        hasher.update(block);
        hasher.finalize().into()
    }

    /// Writes `tree_bytes` (as produced by `finalize`) to `fd` at
    /// `hash_tree_offset`, wrapped by the caller in a `CachedFileDescriptor`
    /// for batched writes the way the upstream writer does.
    pub fn write_tree(fd: &mut dyn FileDescriptor, offset: u64, tree_bytes: &[u8]) -> CoreResult<()> {
        fd.seek(offset)?;
        write_all(fd, tree_bytes)
    }
}
