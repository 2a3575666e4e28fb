//! Update application orchestration (spec.md §2): wires the Dynamic
//! Partition Controller, Delta Performer, Operation Executors, Verity
//! Writer, and Filesystem Verifier into the single sequence a caller drives
//! per update. Grounded on the `DeltaPerformer`/`PartitionWriter`/
//! `FilesystemVerifierAction` collaboration described in spec.md §2's
//! data-flow paragraph; this module is the one piece of that collaboration
//! the teacher has no direct equivalent for, so its shape follows spec.md
//! §2 and §4.4 directly rather than a single source file.

use crate::collaborators::{BootControl, HttpFetcher};
use crate::config::CoreConfig;
use crate::data::{InstallOperation, InstallPlan, Partition, PartitionUpdate};
use crate::dpc::DynamicPartitionController;
use crate::error::{CoreError, CoreResult};
use crate::executors::{self, ExecutionContext};
use crate::io::{CachedFileDescriptor, DirectFileDescriptor, FileDescriptor};
use crate::performer::{DeltaPerformer, PendingOperation, Prefs};
use crate::verifier::FilesystemVerifier;
use crate::verity::{FecEncoder, HashTreeBuilder};

/// No published interleave policy survives distillation into the manifest
/// (`fec_roots` is declared, `fec_ecc_interleave` is not), so sequential
/// codewords are used rather than guessing a stride. See DESIGN.md.
const FEC_INTERLEAVE: usize = 1;

/// Applies one payload end to end, following the sequence a real update
/// attempt runs: prepare partition devices, stream and dispatch every
/// operation, write verity metadata where the manifest declares it, verify
/// the result, then hand the device back to `BootControl` on success or
/// unwind the attempt on a terminal failure (spec.md §7).
pub fn apply_update(
    config: &CoreConfig,
    dpc: &mut DynamicPartitionController,
    plan: &InstallPlan,
    fetcher: &mut dyn HttpFetcher,
    prefs: &mut dyn Prefs,
    boot_control: &dyn BootControl,
    in_recovery: bool,
) -> CoreResult<()> {
    dpc.prepare_partitions_for_update(plan, in_recovery)?;

    match run_payload(config, dpc, plan, fetcher, prefs) {
        Ok(()) => {
            dpc.finish_update()?;
            boot_control.set_active_boot_slot(plan.target_slot)?;
            Ok(())
        }
        Err(e) => {
            if e.is_terminal(in_recovery) {
                dpc.reset_update()?;
            }
            Err(e)
        }
    }
}

fn run_payload(
    config: &CoreConfig,
    dpc: &mut DynamicPartitionController,
    plan: &InstallPlan,
    fetcher: &mut dyn HttpFetcher,
    prefs: &mut dyn Prefs,
) -> CoreResult<()> {
    let mut performer = if plan.is_resume {
        DeltaPerformer::resume(fetcher, prefs)?
    } else {
        DeltaPerformer::new(fetcher, prefs)
    };

    let mut open: Option<OpenPartition> = None;

    performer.run_to_completion(|pending: &PendingOperation| {
        if open
            .as_ref()
            .map(|o| o.partition_update.partition_name != pending.partition.partition_name)
            .unwrap_or(true)
        {
            if let Some(prev) = open.take() {
                prev.finish(config, plan)?;
            }
            open = Some(OpenPartition::open(config, dpc, plan, &pending.partition)?);
        }

        open.as_mut()
            .expect("just opened above")
            .apply_operation(config, &pending.operation, &pending.data)?;

        if pending.is_last_in_partition {
            if let Some(done) = open.take() {
                done.finish(config, plan)?;
            }
        }
        Ok(())
    })?;

    // Partitions the manifest declares with zero operations (nothing to
    // write, but still carrying a verity/hash declaration) never appear as
    // a `PendingOperation` above, since the performer's resume checkpoint
    // only counts operations. Run them through the same open/finish path
    // so their verity tree and target hash still get produced.
    for partition_update in performer.partition_headers()? {
        if partition_update.operations.is_empty() {
            OpenPartition::open(config, dpc, plan, &partition_update)?.finish(config, plan)?;
        }
    }

    Ok(())
}

/// Tracks the target/source file descriptors open for whichever partition
/// is currently being written, across however many `PendingOperation`s it
/// takes to exhaust that partition's operations. Replaces the old
/// per-partition batch loop (`apply_partition`) now that the performer
/// yields one operation at a time for resume-checkpoint granularity.
struct OpenPartition {
    partition_update: PartitionUpdate,
    skip: bool,
    target_size: u64,
    target: Option<Box<dyn FileDescriptor>>,
    source: Option<DirectFileDescriptor>,
    ecc_source: Option<DirectFileDescriptor>,
}

impl OpenPartition {
    /// Opens the target/source handles for `partition_update`'s partition,
    /// or marks it `skip` without opening anything when the plan doesn't
    /// know the partition or declares a zero target size (spec.md §8
    /// boundary case: "Zero-length partition in plan is skipped without
    /// opening a file descriptor").
    fn open(
        config: &CoreConfig,
        dpc: &mut DynamicPartitionController,
        plan: &InstallPlan,
        partition_update: &PartitionUpdate,
    ) -> CoreResult<Self> {
        let partition = plan.partition(&partition_update.partition_name).ok_or_else(|| {
            CoreError::InvalidArgument(format!(
                "payload references partition \"{}\" not present in the install plan",
                partition_update.partition_name
            ))
        })?;

        if partition.target_size == 0 {
            return Ok(OpenPartition {
                partition_update: partition_update.clone(),
                skip: true,
                target_size: 0,
                target: None,
                source: None,
                ecc_source: None,
            });
        }

        let target = open_target(config, dpc, partition)?;
        let source = open_optional(partition.source_path.as_deref())?;
        let ecc_source = open_optional(partition.source_ecc_path.as_deref())?;

        Ok(OpenPartition {
            partition_update: partition_update.clone(),
            skip: false,
            target_size: partition.target_size,
            target: Some(target),
            source,
            ecc_source,
        })
    }

    fn apply_operation(&mut self, config: &CoreConfig, op: &InstallOperation, data: &[u8]) -> CoreResult<()> {
        if self.skip {
            return Ok(());
        }
        if op.dst_extents.is_empty() {
            return Err(CoreError::DownloadOperationExecutionError(
                "operation carries no destination extents".into(),
            ));
        }
        let target = self.target.as_mut().expect("opened target for a non-skipped partition");
        let mut ctx = ExecutionContext {
            target: &mut **target,
            source: self.source.as_mut().map(|fd| fd as &mut dyn FileDescriptor),
            ecc_source: self.ecc_source.as_mut().map(|fd| fd as &mut dyn FileDescriptor),
            block_size: config.block_size as u64,
            copy_buffer_size: config.copy_buffer_size,
            puffin_cache_limit: config.puffin_cache_limit,
        };
        executors::execute_operation(&mut ctx, op, data)
    }

    /// Writes the verity overlay (if declared) and verifies the finished
    /// partition. No-op for a partition that was never opened (`skip`).
    fn finish(self, config: &CoreConfig, plan: &InstallPlan) -> CoreResult<()> {
        if self.skip {
            return Ok(());
        }
        let mut target = self.target.expect("opened target for a non-skipped partition");
        let mut source = self.source;

        discard_partition_tail(&mut *target, self.target_size);

        if plan.write_verity && self.partition_update.has_verity() {
            write_verity(config.block_size as u64, &self.partition_update, &mut *target)?;
        }
        target.flush()?;

        verify_partition(config.verifier_chunk_size, &self.partition_update, &mut *target, source.as_mut())
    }
}

/// Opens the target handle for `partition`: a snapshot-backed COW writer
/// (`DynamicPartitionController::open_cow_writer`) when Virtual-A/B
/// compression is active, a plain cached direct file descriptor otherwise.
/// Both are boxed behind `FileDescriptor` so the executors/verifier code
/// below doesn't need to know which one it got.
fn open_target(
    config: &CoreConfig,
    dpc: &mut DynamicPartitionController,
    partition: &Partition,
) -> CoreResult<Box<dyn FileDescriptor>> {
    let mut fd = DirectFileDescriptor::new();
    fd.open(&partition.target_path, libc::O_RDWR)?;

    if config.virtual_ab_compression.is_enabled() {
        let cow = dpc.open_cow_writer(&partition.name, fd, config.block_size as u64, partition.target_size)?;
        Ok(Box::new(CachedFileDescriptor::new(cow, 1024 * 1024)))
    } else {
        Ok(Box::new(CachedFileDescriptor::new(fd, 1024 * 1024)))
    }
}

/// Discards the target device past `data_size` (`partition_writer.cc`'s
/// `DiscardPartitionTail`), for dynamic partitions mapped generously larger
/// than the payload's declared size. Best-effort: `FileDescriptor::discard_tail`
/// already falls back silently when the underlying ioctls aren't available,
/// so a failure here is logged rather than propagated.
fn discard_partition_tail(target: &mut dyn FileDescriptor, data_size: u64) {
    if let Err(e) = target.discard_tail(data_size) {
        log::warn!("failed to discard partition tail past {} bytes: {}", data_size, e);
    }
}

fn open_optional(path: Option<&str>) -> CoreResult<Option<DirectFileDescriptor>> {
    let path = match path {
        Some(p) => p,
        None => return Ok(None),
    };
    let mut fd = DirectFileDescriptor::new();
    fd.open(path, libc::O_RDONLY)?;
    Ok(Some(fd))
}

/// Rebuilds the hash tree over the just-written data region and, if the
/// manifest also declares an FEC overlay, its parity bytes, mirroring
/// `VerityWriterAndroid::Init/Update/Finalize` followed by `EncodeFEC`
/// (spec.md §4.4).
fn write_verity(
    block_size: u64,
    partition_update: &PartitionUpdate,
    target: &mut dyn FileDescriptor,
) -> CoreResult<()> {
    let mut builder = HashTreeBuilder::new(
        block_size as usize,
        partition_update.hash_tree_salt.clone(),
        partition_update.hash_tree_data_size / block_size,
    );

    target.seek(partition_update.hash_tree_data_offset)?;
    let mut buf = vec![0u8; block_size as usize];
    let mut remaining = partition_update.hash_tree_data_size;
    while remaining > 0 {
        let want = remaining.min(block_size) as usize;
        crate::io::read_exact(target, &mut buf[..want])?;
        builder.update(&buf[..want])?;
        remaining -= want as u64;
    }

    let (_root, tree_bytes) = builder.finalize()?;
    HashTreeBuilder::write_tree(target, partition_update.hash_tree_offset, &tree_bytes)?;

    if partition_update.has_fec() {
        let encoder = FecEncoder::new(partition_update.fec_roots)?;
        target.seek(partition_update.fec_data_offset)?;
        let mut fec_input = vec![0u8; partition_update.fec_data_size as usize];
        crate::io::read_exact(target, &mut fec_input)?;
        let parity = encoder.encode_interleaved(&fec_input, FEC_INTERLEAVE);
        target.seek(partition_update.fec_offset)?;
        crate::io::write_all(target, &parity)?;
    }

    Ok(())
}

/// Re-hashes the written target and, on a mismatch, additionally checks the
/// source partition per spec.md §4.4's branch: a source that still matches
/// its declared pre-image means the target itself is broken
/// (`NewRootfsVerificationError`); a source that doesn't means the device
/// was never in the state the payload was built against
/// (`DownloadStateInitializationError`, surfaced in place of the target
/// error since it is the more actionable diagnosis).
fn verify_partition(
    chunk_size: usize,
    partition_update: &PartitionUpdate,
    target: &mut dyn FileDescriptor,
    source: Option<&mut DirectFileDescriptor>,
) -> CoreResult<()> {
    let verifier = FilesystemVerifier::new(chunk_size);

    match verifier.verify_partition_target(target, partition_update) {
        Ok(()) => Ok(()),
        Err(CoreError::NewRootfsVerificationError) => {
            if let Some(source_fd) = source {
                verifier.verify_partition_source(source_fd, partition_update)?;
            }
            Err(CoreError::NewRootfsVerificationError)
        }
        Err(e) => Err(e),
    }
}
