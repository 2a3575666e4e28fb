//! Assembled install plan (spec.md §3): what the DPC and Delta Performer
//! agree to do for a given payload, resolved from the manifest plus the
//! current slot state. Carries a `Display` impl for log-friendly dumps,
//! supplementing `InstallPlan::ToString`/`Dump` in `install_plan.cc`
//! (diagnostics only, not a serialization format).

use std::fmt;

use super::slot::Slot;

#[derive(Debug, Clone)]
pub struct Partition {
    pub name: String,
    pub source_path: Option<String>,
    /// Forward-error-corrected device backing the same blocks as
    /// `source_path`, consulted by SOURCE_COPY/SOURCE_BSDIFF when the
    /// primary source read's hash doesn't match (spec.md §4.3).
    pub source_ecc_path: Option<String>,
    pub target_path: String,
    pub source_size: Option<u64>,
    pub target_size: u64,
    pub run_postinstall: bool,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "partition {{ name: {}, source: {}, target: {} ({} bytes) }}",
            self.name,
            self.source_path.as_deref().unwrap_or("<none>"),
            self.target_path,
            self.target_size
        )
    }
}

#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub source_slot: Slot,
    pub target_slot: Slot,
    pub partitions: Vec<Partition>,
    pub is_resume: bool,
    pub payload_size: u64,
    pub payload_hash: Vec<u8>,
    pub switch_slot_on_reboot: bool,
    pub run_post_install: bool,
    /// Whether the Verity Writer should build a hash tree/FEC overlay for
    /// partitions that declare one (spec.md §3, `InstallPlan::write_verity`).
    pub write_verity: bool,
    /// When false, a missing/failed hash check degrades to a warning instead
    /// of a terminal error (spec.md §3, §4.2's metadata-signature carve-out).
    pub hash_checks_mandatory: bool,
    /// Set when the update requires a data wipe on next boot; surfaced to
    /// `BootControl`/the caller rather than acted on by this core.
    pub powerwash_required: bool,
}

impl InstallPlan {
    pub fn new(source_slot: Slot, target_slot: Slot) -> Self {
        InstallPlan {
            source_slot,
            target_slot,
            partitions: Vec::new(),
            is_resume: false,
            payload_size: 0,
            payload_hash: Vec::new(),
            switch_slot_on_reboot: true,
            run_post_install: true,
            write_verity: false,
            hash_checks_mandatory: true,
            powerwash_required: false,
        }
    }

    pub fn partition(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }
}

impl fmt::Display for InstallPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "InstallPlan {{ source_slot: {}, target_slot: {}, is_resume: {}, payload_size: {} }}",
            self.source_slot, self.target_slot, self.is_resume, self.payload_size
        )?;
        for p in &self.partitions {
            writeln!(f, "  {}", p)?;
        }
        Ok(())
    }
}

impl PartialEq for InstallPlan {
    fn eq(&self, other: &Self) -> bool {
        self.source_slot == other.source_slot
            && self.target_slot == other.target_slot
            && self.payload_size == other.payload_size
            && self.payload_hash == other.payload_hash
            && self.partitions.iter().map(|p| &p.name).eq(other.partitions.iter().map(|p| &p.name))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_includes_partitions() {
        let mut plan = InstallPlan::new(Slot::new(0), Slot::new(1));
        plan.partitions.push(Partition {
            name: "system".into(),
            source_path: Some("/dev/block/system_a".into()),
            source_ecc_path: None,
            target_path: "/dev/block/system_b".into(),
            source_size: Some(1024),
            target_size: 2048,
            run_postinstall: true,
        });
        let rendered = plan.to_string();
        assert!(rendered.contains("system"));
        assert!(rendered.contains("target_slot: _b"));
    }
}
