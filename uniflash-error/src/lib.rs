use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type HalResult<T> = Result<T, HalError>;
pub type FlashResult<T> = Result<T, FlashError>;

#[derive(Error, Debug)]
pub enum HalError {
    #[error("Safety lock engaged. Destructive operations require explicit confirmation.")]
    SafetyLock,

    #[error("Disk is busy (mounted or in use)")]
    DiskBusy,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command failed: {program} (exit={code:?}): {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command timed out: {program} after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("nix errno: {0}")]
    Nix(#[from] nix::errno::Errno),

    #[error("{0}")]
    Other(String),
}

/// Device sub-step that was running when a destructive call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStep {
    InitialPartitioning,
    WipeSignatures,
    PartitionTable,
    CreateFilesystem,
}

impl fmt::Display for DeviceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceStep::InitialPartitioning => "initial partitioning",
            DeviceStep::WipeSignatures => "signature wipe",
            DeviceStep::PartitionTable => "partition table creation",
            DeviceStep::CreateFilesystem => "filesystem creation",
        };
        f.write_str(name)
    }
}

/// Fatal outcomes of a flash session.
///
/// Every variant short-circuits the remaining stages; the session still runs cleanup.
#[derive(Error, Debug)]
pub enum FlashError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unable to mount source filesystem {source_path}: {cause}")]
    SourceMountFailed {
        source_path: PathBuf,
        #[source]
        cause: HalError,
    },

    #[error("Unable to mount target filesystem {partition}: {cause}")]
    TargetMountFailed {
        partition: PathBuf,
        #[source]
        cause: HalError,
    },

    #[error("Device modification failed during {step} (device may be inconsistent): {cause}")]
    DeviceModificationFailed {
        step: DeviceStep,
        #[source]
        cause: HalError,
    },

    #[error("Copy failed at {path}: {cause}")]
    CopyFailed {
        path: PathBuf,
        #[source]
        cause: HalError,
    },

    #[error("Operation cancelled by user")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal fault: {0}")]
    Internal(String),
}

impl FlashError {
    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            FlashError::InvalidInput(_) => "InvalidInput",
            FlashError::SourceMountFailed { .. } => "SourceMountFailed",
            FlashError::TargetMountFailed { .. } => "TargetMountFailed",
            FlashError::DeviceModificationFailed { .. } => "DeviceModificationFailed",
            FlashError::CopyFailed { .. } => "CopyFailed",
            FlashError::Cancelled => "Cancelled",
            FlashError::Io(_) => "Io",
            FlashError::Internal(_) => "Internal",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FlashError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_failure_names_the_step() {
        let err = FlashError::DeviceModificationFailed {
            step: DeviceStep::PartitionTable,
            cause: HalError::Other("parted exploded".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("partition table creation"));
        assert!(msg.contains("parted exploded"));
        assert_eq!(err.kind(), "DeviceModificationFailed");
    }

    #[test]
    fn copy_failure_keeps_path_and_source() {
        let err = FlashError::CopyFailed {
            path: PathBuf::from("/media/src/sources/install.wim"),
            cause: HalError::Io(io::Error::new(io::ErrorKind::Other, "disk full")),
        };
        assert!(err.to_string().contains("install.wim"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn cancelled_is_recognised() {
        assert!(FlashError::Cancelled.is_cancelled());
        assert!(!FlashError::InvalidInput("x".into()).is_cancelled());
    }
}
