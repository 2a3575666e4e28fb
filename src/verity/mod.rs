//! Verity / hash-tree writer (spec.md §4.4): builds a dm-verity hash tree
//! over a partition's data blocks and, when FEC is requested, a
//! Reed-Solomon error-correcting overlay. Grounded on
//! `verity_writer_android.cc`'s `Init`/`Update`/`Finalize`/`EncodeFEC` shape.

mod fec;
mod hash_tree;

pub use fec::FecEncoder;
pub use hash_tree::HashTreeBuilder;
