//! Wraps the prost-generated wire types from `proto/update_metadata.proto`
//! in the Rust-native shapes the rest of the crate works with (extents as
//! `ExtentList` rather than `Vec<proto::Extent>`, operation kind as a plain
//! enum instead of an i32 tag).

use crate::error::{CoreError, CoreResult};

use super::extent::{Extent, ExtentList};

/// Generated protobuf types, kept available under their own module for
/// callers that need the raw wire shape (e.g. metadata signature
/// verification operates on the undecoded manifest bytes).
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/chromeos_update_engine.rs"));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Replace,
    ReplaceBz,
    Move,
    Bsdiff,
    SourceCopy,
    SourceBsdiff,
    ReplaceXz,
    Zero,
    Discard,
    BrotliBsdiff,
    Puffdiff,
}

impl OperationKind {
    fn from_proto(t: i32) -> CoreResult<Self> {
        use proto::install_operation::Type;
        let kind = match Type::from_i32(t) {
            Some(Type::Replace) => OperationKind::Replace,
            Some(Type::ReplaceBz) => OperationKind::ReplaceBz,
            Some(Type::Move) => OperationKind::Move,
            Some(Type::Bsdiff) => OperationKind::Bsdiff,
            Some(Type::SourceCopy) => OperationKind::SourceCopy,
            Some(Type::SourceBsdiff) => OperationKind::SourceBsdiff,
            Some(Type::ReplaceXz) => OperationKind::ReplaceXz,
            Some(Type::Zero) => OperationKind::Zero,
            Some(Type::Discard) => OperationKind::Discard,
            Some(Type::BrotliBsdiff) => OperationKind::BrotliBsdiff,
            Some(Type::Puffdiff) => OperationKind::Puffdiff,
            None => {
                return Err(CoreError::DownloadManifestParseError(format!(
                    "unknown operation type tag {}",
                    t
                )))
            }
        };
        Ok(kind)
    }

    /// Whether this operation type carries a payload blob at
    /// `data_offset`/`data_length`, as opposed to operating purely on
    /// extents already on disk (MOVE, SOURCE_COPY, ZERO, DISCARD).
    pub fn has_payload_data(self) -> bool {
        !matches!(
            self,
            OperationKind::Move | OperationKind::SourceCopy | OperationKind::Zero | OperationKind::Discard
        )
    }

    /// Whether the op reads from `src_extents` in addition to `dst_extents`.
    pub fn is_diff(self) -> bool {
        matches!(
            self,
            OperationKind::SourceBsdiff
                | OperationKind::BrotliBsdiff
                | OperationKind::Puffdiff
                | OperationKind::Bsdiff
        )
    }
}

#[derive(Debug, Clone)]
pub struct InstallOperation {
    pub kind: OperationKind,
    pub data_offset: u64,
    pub data_length: u64,
    pub src_extents: ExtentList,
    pub src_length: u64,
    pub dst_extents: ExtentList,
    pub dst_length: u64,
    pub data_sha256_hash: Vec<u8>,
    pub src_sha256_hash: Vec<u8>,
}

impl InstallOperation {
    pub fn from_proto(op: &proto::InstallOperation) -> CoreResult<Self> {
        let kind = OperationKind::from_proto(op.r#type)?;
        Ok(InstallOperation {
            kind,
            data_offset: op.data_offset,
            data_length: op.data_length,
            src_extents: extents_from_proto(&op.src_extents),
            src_length: op.src_length,
            dst_extents: extents_from_proto(&op.dst_extents),
            dst_length: op.dst_length,
            data_sha256_hash: op.data_sha256_hash.clone(),
            src_sha256_hash: op.src_sha256_hash.clone(),
        })
    }
}

fn extents_from_proto(extents: &[proto::Extent]) -> ExtentList {
    ExtentList::from_vec(
        extents
            .iter()
            .map(|e| Extent::new(e.start_block, e.num_blocks))
            .collect(),
    )
}

#[derive(Debug, Clone)]
pub struct PartitionUpdate {
    pub partition_name: String,
    pub old_partition_size: Option<u64>,
    pub old_partition_hash: Option<Vec<u8>>,
    pub new_partition_size: u64,
    pub new_partition_hash: Vec<u8>,
    pub operations: Vec<InstallOperation>,

    pub hash_tree_data_offset: u64,
    pub hash_tree_data_size: u64,
    pub hash_tree_offset: u64,
    pub hash_tree_size: u64,
    pub hash_tree_algorithm: String,
    pub hash_tree_salt: Vec<u8>,

    pub fec_data_offset: u64,
    pub fec_data_size: u64,
    pub fec_offset: u64,
    pub fec_size: u64,
    pub fec_roots: u32,
}

impl PartitionUpdate {
    pub fn from_proto(pu: &proto::PartitionUpdate) -> CoreResult<Self> {
        let operations = pu
            .operations
            .iter()
            .map(InstallOperation::from_proto)
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(PartitionUpdate {
            partition_name: pu.partition_name.clone(),
            old_partition_size: pu.old_partition_info.as_ref().map(|i| i.size),
            old_partition_hash: pu.old_partition_info.as_ref().map(|i| i.hash.clone()),
            new_partition_size: pu.new_partition_info.as_ref().map(|i| i.size).unwrap_or(0),
            new_partition_hash: pu
                .new_partition_info
                .as_ref()
                .map(|i| i.hash.clone())
                .unwrap_or_default(),
            operations,
            hash_tree_data_offset: pu.hash_tree_data_offset,
            hash_tree_data_size: pu.hash_tree_data_size,
            hash_tree_offset: pu.hash_tree_offset,
            hash_tree_size: pu.hash_tree_size,
            hash_tree_algorithm: pu.hash_tree_algorithm.clone(),
            hash_tree_salt: pu.hash_tree_salt.clone(),
            fec_data_offset: pu.fec_data_offset,
            fec_data_size: pu.fec_data_size,
            fec_offset: pu.fec_offset,
            fec_size: pu.fec_size,
            fec_roots: pu.fec_roots,
        })
    }

    pub fn has_verity(&self) -> bool {
        self.hash_tree_size > 0
    }

    pub fn has_fec(&self) -> bool {
        self.fec_size > 0
    }
}
