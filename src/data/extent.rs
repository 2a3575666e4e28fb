//! Extent arithmetic (spec.md §3): a contiguous run of blocks, plus the
//! list-level operations the executors and performer rely on (adjacency
//! merging, appending single blocks, total block count, sparse-hole
//! sentinel).

/// Marks an extent as a "sparse hole": read as zeros, never backed by real
/// data. Mirrors `kSparseHole = kuint64max` in `payload_constants.cc`.
pub const SPARSE_HOLE: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub start_block: u64,
    pub num_blocks: u64,
}

impl Extent {
    pub fn new(start_block: u64, num_blocks: u64) -> Self {
        Extent {
            start_block,
            num_blocks,
        }
    }

    pub fn is_sparse_hole(&self) -> bool {
        self.start_block == SPARSE_HOLE
    }

    /// Whether `other` immediately follows this extent (same storage run).
    /// A sparse hole is never adjacent to anything; holes never merge with
    /// real data so that zero-fill stays an explicit, auditable step.
    fn adjacent_to(&self, other: &Extent) -> bool {
        if self.is_sparse_hole() || other.is_sparse_hole() {
            return false;
        }
        self.start_block + self.num_blocks == other.start_block
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtentList(pub Vec<Extent>);

impl ExtentList {
    pub fn new() -> Self {
        ExtentList(Vec::new())
    }

    pub fn from_vec(extents: Vec<Extent>) -> Self {
        ExtentList(extents)
    }

    pub fn blocks(&self) -> u64 {
        self.0.iter().map(|e| e.num_blocks).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a single block, merging into the last extent when contiguous
    /// with it (the common case when writing sequential extents out of a
    /// bsdiff/puffin patch stream).
    pub fn append_block(&mut self, block: u64) {
        self.append_blocks(block, 1);
    }

    pub fn append_blocks(&mut self, start_block: u64, num_blocks: u64) {
        if num_blocks == 0 {
            return;
        }
        let candidate = Extent::new(start_block, num_blocks);
        if let Some(last) = self.0.last_mut() {
            if last.adjacent_to(&candidate) {
                last.num_blocks += num_blocks;
                return;
            }
        }
        self.0.push(candidate);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Extent> {
        self.0.iter()
    }
}

impl IntoIterator for ExtentList {
    type Item = Extent;
    type IntoIter = std::vec::IntoIter<Extent>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
