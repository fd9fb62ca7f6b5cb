use thiserror::Error;
use uniflash_error::{FlashError, FlashResult};
use uniflash_hal::FilesystemType;

use super::stage::{Outcome, Stage};
use crate::analyze::SourceAnalysis;
use crate::copier::CopySummary;

/// Non-fatal problems; a session with warnings still succeeds.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlashWarning {
    #[error("UEFI:NTFS boot support was not installed: {cause}")]
    BootSupport { cause: String },

    #[error("Windows 7 UEFI loader could not be installed: {cause}")]
    LegacyEfiLoader { cause: String },

    #[error("Unable to set the boot flag: {cause}")]
    BootFlag { cause: String },
}

impl FlashWarning {
    pub fn kind(&self) -> &'static str {
        match self {
            FlashWarning::BootSupport { .. } => "BootSupportWarning",
            FlashWarning::LegacyEfiLoader { .. } => "LegacyEfiLoaderWarning",
            FlashWarning::BootFlag { .. } => "BootFlagWarning",
        }
    }
}

/// Everything a caller learns about a finished session.
#[derive(Debug)]
pub struct FlashReport {
    pub outcome: Outcome,
    pub error: Option<FlashError>,
    pub warnings: Vec<FlashWarning>,
    pub resolved_filesystem: FilesystemType,
    /// FAT32 was requested but a source file forced NTFS.
    pub escalated: bool,
    pub analysis: Option<SourceAnalysis>,
    pub copied: Option<CopySummary>,
    /// Every stage entered, terminal state last.
    pub stages: Vec<Stage>,
    pub cleanup_runs: u32,
}

impl FlashReport {
    /// Report for a session whose thread died outside the pipeline's own fault handling.
    pub(crate) fn internal_failure(requested: FilesystemType, message: String) -> Self {
        Self {
            outcome: Outcome::Failed,
            error: Some(FlashError::Internal(message)),
            warnings: Vec::new(),
            resolved_filesystem: requested,
            escalated: false,
            analysis: None,
            copied: None,
            stages: Vec::new(),
            cleanup_runs: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn visited(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    pub fn warnings_of(&self, kind: &str) -> usize {
        self.warnings.iter().filter(|w| w.kind() == kind).count()
    }

    /// Process exit code: 0 success, 1 failure, 2 cancelled.
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            Outcome::Success => 0,
            Outcome::Failed => 1,
            Outcome::Cancelled => 2,
        }
    }

    pub fn into_result(mut self) -> FlashResult<Self> {
        match self.outcome {
            Outcome::Success => Ok(self),
            Outcome::Cancelled => Err(FlashError::Cancelled),
            Outcome::Failed => Err(self
                .error
                .take()
                .unwrap_or_else(|| FlashError::Internal("failed without an error".into()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcome: Outcome, error: Option<FlashError>) -> FlashReport {
        FlashReport {
            outcome,
            error,
            warnings: vec![FlashWarning::BootSupport {
                cause: "timed out".into(),
            }],
            resolved_filesystem: FilesystemType::Ntfs,
            escalated: true,
            analysis: None,
            copied: None,
            stages: vec![Stage::Idle, Stage::Terminated(outcome)],
            cleanup_runs: 1,
        }
    }

    #[test]
    fn exit_codes_distinguish_cancellation() {
        assert_eq!(report(Outcome::Success, None).exit_code(), 0);
        assert_eq!(
            report(Outcome::Failed, Some(FlashError::InvalidInput("x".into()))).exit_code(),
            1
        );
        assert_eq!(report(Outcome::Cancelled, Some(FlashError::Cancelled)).exit_code(), 2);
    }

    #[test]
    fn into_result_keeps_success_with_warnings() {
        let ok = report(Outcome::Success, None).into_result().unwrap();
        assert_eq!(ok.warnings_of("BootSupportWarning"), 1);

        let err = report(Outcome::Failed, Some(FlashError::InvalidInput("bad".into())))
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
        assert!(report(Outcome::Cancelled, None)
            .into_result()
            .unwrap_err()
            .is_cancelled());
    }
}
