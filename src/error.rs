//! Crate-wide error kinds, following the surface values from the error
//! handling design (signature/hash mismatches, space exhaustion, device
//! mapper failures, ...). Individual subsystems define their own narrower
//! error enums and convert into `CoreError` at the boundary the same way the
//! teacher's `bootcontrol.rs` wraps HAL errors into `std::io::Error`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload framing is not recognized (bad magic or version)")]
    PayloadMismatchedType,

    #[error("unsupported minor payload version: {0}")]
    UnsupportedMinorPayloadVersion(u32),

    #[error("failed to parse manifest: {0}")]
    DownloadManifestParseError(String),

    #[error("metadata signature does not match")]
    DownloadMetadataSignatureMismatch,

    #[error("metadata signature missing but required")]
    DownloadMetadataSignatureMissing,

    #[error("operation data hash mismatch")]
    DownloadOperationHashMismatch,

    #[error("operation data hash missing but required")]
    DownloadOperationHashMissing,

    #[error("operation execution failed: {0}")]
    DownloadOperationExecutionError(String),

    #[error("payload hash mismatch")]
    PayloadHashMismatchError,

    #[error("payload size mismatch")]
    PayloadSizeMismatchError,

    #[error("target partition hash mismatch but source matched: update is broken for this device")]
    NewRootfsVerificationError,

    #[error("source partition hash mismatch: device is not in the expected pre-state")]
    DownloadStateInitializationError,

    #[error("filesystem verification failed: {0}")]
    FilesystemVerifierError(String),

    #[error("verity/FEC computation failed: {0}")]
    VerityCalculationError(String),

    #[error("not enough space, required {required_bytes} additional bytes")]
    NotEnoughSpace { required_bytes: u64 },

    #[error("device mapper error: {0}")]
    DeviceMapperError(String),

    #[error("slot marked active but bootloader reports it is not")]
    UpdatedButNotActive,

    #[error("update canceled by user")]
    UserCanceled,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CoreError {
    /// Terminal conditions (spec.md §7): any signature mismatch, any
    /// unsupported-version error, any rootfs/source verification error, and
    /// `NotEnoughSpace` outside recovery. `in_recovery` lets the caller fold
    /// in the recovery-mode carve-out for `NotEnoughSpace`.
    pub fn is_terminal(&self, in_recovery: bool) -> bool {
        match self {
            CoreError::DownloadMetadataSignatureMismatch
            | CoreError::DownloadMetadataSignatureMissing
            | CoreError::UnsupportedMinorPayloadVersion(_)
            | CoreError::NewRootfsVerificationError
            | CoreError::DownloadStateInitializationError => true,
            CoreError::NotEnoughSpace { .. } => !in_recovery,
            _ => false,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
