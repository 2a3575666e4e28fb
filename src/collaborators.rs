//! Trait contracts for collaborators this crate depends on but does not
//! implement (spec.md §6.4): bootloader control, the caller's message loop,
//! payload fetching, and the Virtual-A/B snapshot manager. Concrete
//! implementations (BCB parsing, netlink/uevent, HTTP, Omaha) live outside
//! this crate's Non-goals; only the shapes that the DPC and Delta Performer
//! call through are specified here, the way `sabaton_hal::BootControl` is an
//! external trait the teacher's `bootcontrol.rs` merely implements.

use crate::data::Slot;
use crate::error::CoreResult;

/// Slot query/activation surface. A real implementation speaks to the
/// bootloader control block or an equivalent mechanism; this crate only
/// needs the contract.
pub trait BootControl: Send + Sync {
    fn number_of_slots(&self) -> u32;
    fn current_slot(&self) -> Slot;
    fn get_active_boot_slot(&self) -> CoreResult<Slot>;
    fn is_slot_bootable(&self, slot: Slot) -> CoreResult<bool>;
    fn is_slot_marked_successful(&self, slot: Slot) -> CoreResult<bool>;
    fn mark_boot_successful(&self) -> CoreResult<()>;
    fn set_active_boot_slot(&self, slot: Slot) -> CoreResult<()>;
    fn set_slot_as_unbootable(&self, slot: Slot) -> CoreResult<()>;
}

/// Scheduling surface the performer uses to yield between chunks instead of
/// blocking a shared event loop. The caller owns the actual loop.
pub trait MessageLoop: Send + Sync {
    fn post_delayed(&self, delay_ms: u64, task: Box<dyn FnOnce() + Send>);
    fn post(&self, task: Box<dyn FnOnce() + Send>) {
        self.post_delayed(0, task)
    }
}

/// Streaming payload source. Implementations range from an HTTP range-GET
/// client to a local file reader; the performer only needs bytes delivered
/// in order with resumable offsets.
pub trait HttpFetcher: Send + Sync {
    /// Begin (or resume, if `offset > 0`) fetching from `offset`.
    fn seek(&mut self, offset: u64) -> CoreResult<()>;
    /// Read up to `buf.len()` bytes, returning the number actually read (0
    /// at end of stream).
    fn read(&mut self, buf: &mut [u8]) -> CoreResult<usize>;
}

/// Virtual-A/B snapshot lifecycle, kept as an opaque trait boundary per
/// spec.md §6.2: this crate drives it through `BeginUpdate`/`CreateUpdate
/// Snapshots`/`MapAllSnapshots`/`FinishedSnapshotWrites`/`CancelUpdate` style
/// calls without knowing the storage backend (dm-snapshot, userspace COW,
/// ...).
pub trait SnapshotManager: Send + Sync {
    fn begin_update(&self) -> CoreResult<()>;
    fn create_update_snapshots(&self, partitions: &[String]) -> CoreResult<()>;
    fn map_all_snapshots(&self) -> CoreResult<()>;
    fn unmap_all_snapshots(&self) -> CoreResult<()>;
    fn finished_snapshot_writes(&self) -> CoreResult<()>;
    fn cancel_update(&self) -> CoreResult<()>;
    fn needs_rollback(&self) -> bool;
}
