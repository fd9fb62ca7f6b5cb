use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use uniflash_error::{FlashError, FlashResult};
use uniflash_hal::{FilesystemType, TableStyle};

use super::report::{FlashReport, FlashWarning};
use super::stage::{Outcome, Stage, StageEvent};
use crate::analyze::SourceAnalysis;
use crate::copier::CopySummary;
use crate::progress::ProgressReporter;
use crate::request::TargetAddress;

/// A mountpoint directory the session created, and whether something is mounted on it.
#[derive(Debug)]
pub(crate) struct MountPoint {
    pub(crate) path: PathBuf,
    pub(crate) mounted: bool,
}

impl MountPoint {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            mounted: false,
        }
    }
}

/// Mutable run-state of one flash operation, owned by the pipeline.
#[derive(Debug)]
pub struct FlashSession {
    pub(crate) stage: Stage,
    pub(crate) scratch: Option<TempDir>,
    pub(crate) source_mount: Option<MountPoint>,
    pub(crate) target_mount: Option<MountPoint>,
    pub(crate) target: Option<TargetAddress>,
    pub(crate) data_partition: Option<PathBuf>,
    pub(crate) table_style: TableStyle,
    pub(crate) requested_filesystem: FilesystemType,
    pub(crate) resolved_filesystem: FilesystemType,
    pub(crate) escalated: bool,
    pub(crate) analysis: Option<SourceAnalysis>,
    pub(crate) copied: Option<CopySummary>,
    pub(crate) reporter: Option<Arc<ProgressReporter>>,
    pub(crate) warnings: Vec<FlashWarning>,
    pub(crate) last_error: Option<FlashError>,
    pub(crate) history: Vec<Stage>,
    pub(crate) cleanup_runs: u32,
}

impl FlashSession {
    pub fn new(filesystem: FilesystemType) -> Self {
        Self {
            stage: Stage::Idle,
            scratch: None,
            source_mount: None,
            target_mount: None,
            target: None,
            data_partition: None,
            table_style: TableStyle::default(),
            requested_filesystem: filesystem,
            resolved_filesystem: filesystem,
            escalated: false,
            analysis: None,
            copied: None,
            reporter: None,
            warnings: Vec::new(),
            last_error: None,
            history: vec![Stage::Idle],
            cleanup_runs: 0,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn resolved_filesystem(&self) -> FilesystemType {
        self.resolved_filesystem
    }

    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }

    /// Suffix shared by the scratch directory and this session's mountpoints.
    pub(crate) fn suffix(&self) -> FlashResult<String> {
        let name = self
            .scratch_dir()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
            .ok_or_else(|| FlashError::Internal("scratch directory missing".into()))?;
        Ok(name.trim_start_matches("UniFlash.").to_string())
    }

    pub(crate) fn advance(&mut self, event: StageEvent) -> FlashResult<()> {
        let next = self
            .stage
            .transition(event)
            .map_err(|err| FlashError::Internal(err.to_string()))?;
        log::debug!("stage {} -> {}", self.stage, next);
        self.stage = next;
        self.history.push(next);
        Ok(())
    }

    /// Switch FAT32 to NTFS. Only legal once, while the source is being analysed.
    pub(crate) fn escalate_to_ntfs(&mut self) -> FlashResult<()> {
        if self.stage != Stage::AnalyzingSource {
            return Err(FlashError::Internal(format!(
                "filesystem escalation attempted during {}",
                self.stage
            )));
        }
        if self.escalated || self.resolved_filesystem != FilesystemType::Fat32 {
            return Err(FlashError::Internal(
                "filesystem already resolved beyond FAT32".into(),
            ));
        }
        self.resolved_filesystem = FilesystemType::Ntfs;
        self.escalated = true;
        Ok(())
    }

    pub(crate) fn data_partition(&self) -> FlashResult<&Path> {
        self.data_partition
            .as_deref()
            .ok_or_else(|| FlashError::Internal("data partition not created yet".into()))
    }

    pub(crate) fn target(&self) -> FlashResult<&TargetAddress> {
        self.target
            .as_ref()
            .ok_or_else(|| FlashError::Internal("target not resolved yet".into()))
    }

    pub(crate) fn into_report(self) -> FlashReport {
        let outcome = match self.stage {
            Stage::Terminated(outcome) => outcome,
            _ => Outcome::Failed,
        };
        FlashReport {
            outcome,
            error: self.last_error,
            warnings: self.warnings,
            resolved_filesystem: self.resolved_filesystem,
            escalated: self.escalated,
            analysis: self.analysis,
            copied: self.copied,
            stages: self.history,
            cleanup_runs: self.cleanup_runs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_is_only_legal_once_during_analysis() {
        let mut session = FlashSession::new(FilesystemType::Fat32);
        assert!(session.escalate_to_ntfs().is_err());

        session.advance(StageEvent::Completed).unwrap();
        session.advance(StageEvent::Completed).unwrap();
        session.advance(StageEvent::Completed).unwrap();
        assert_eq!(session.stage(), Stage::AnalyzingSource);

        session.escalate_to_ntfs().unwrap();
        assert_eq!(session.resolved_filesystem(), FilesystemType::Ntfs);
        assert!(session.escalate_to_ntfs().is_err());

        session.advance(StageEvent::Completed).unwrap();
        assert!(session.escalate_to_ntfs().is_err());
    }

    #[test]
    fn history_records_every_stage() {
        let mut session = FlashSession::new(FilesystemType::Ntfs);
        session.advance(StageEvent::Aborted).unwrap();
        session
            .advance(StageEvent::CleanedUp(Outcome::Failed))
            .unwrap();
        assert!(session.advance(StageEvent::Completed).is_err());

        let report = session.into_report();
        assert_eq!(
            report.stages,
            vec![
                Stage::Idle,
                Stage::CleaningUp,
                Stage::Terminated(Outcome::Failed)
            ]
        );
        assert_eq!(report.outcome, Outcome::Failed);
    }

    #[test]
    fn suffix_needs_a_scratch_directory() {
        let mut session = FlashSession::new(FilesystemType::Fat32);
        assert!(session.suffix().is_err());

        let root = tempfile::tempdir().unwrap();
        session.scratch = Some(
            tempfile::Builder::new()
                .prefix("UniFlash.")
                .tempdir_in(root.path())
                .unwrap(),
        );
        let suffix = session.suffix().unwrap();
        assert!(!suffix.is_empty());
        assert!(!suffix.starts_with("UniFlash"));
    }
}
