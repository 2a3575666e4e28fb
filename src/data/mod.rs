//! Data model types (spec.md §3): slots, extents, the manifest/operation
//! types generated from `proto/update_metadata.proto`, and the install plan
//! assembled from them.

mod extent;
mod install_plan;
mod manifest;
mod slot;

pub use extent::{Extent, ExtentList, SPARSE_HOLE};
pub use install_plan::{InstallPlan, Partition};
pub use manifest::{proto, InstallOperation, OperationKind, PartitionUpdate};
pub use slot::Slot;
