//! Pipeline stages and the one function allowed to move between them.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failed,
    Cancelled,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failed => write!(f, "failed"),
            Outcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Stages of one flash session, in their only legal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Idle,
    ValidatingInput,
    MountingSource,
    AnalyzingSource,
    FormattingTarget,
    WipingTarget,
    PartitioningTarget,
    CreatingFilesystem,
    MountingTarget,
    Copying,
    PostProcessing,
    CleaningUp,
    Terminated(Outcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    /// The stage finished; move to the next one.
    Completed,
    /// Copy finished on NTFS; boot support has to be installed.
    CompletedNeedsBootSupport,
    /// A fatal error or cancellation; go straight to cleanup.
    Aborted,
    /// Cleanup ran; settle the session.
    CleanedUp(Outcome),
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("illegal transition from {from} on {event:?}")]
pub struct IllegalTransition {
    pub from: Stage,
    pub event: StageEvent,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Terminated(_))
    }

    /// Stages that may change the target device.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Stage::FormattingTarget
                | Stage::WipingTarget
                | Stage::PartitioningTarget
                | Stage::CreatingFilesystem
                | Stage::PostProcessing
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Idle => "Idle",
            Stage::ValidatingInput => "ValidatingInput",
            Stage::MountingSource => "MountingSource",
            Stage::AnalyzingSource => "AnalyzingSource",
            Stage::FormattingTarget => "FormattingTarget",
            Stage::WipingTarget => "WipingTarget",
            Stage::PartitioningTarget => "PartitioningTarget",
            Stage::CreatingFilesystem => "CreatingFilesystem",
            Stage::MountingTarget => "MountingTarget",
            Stage::Copying => "Copying",
            Stage::PostProcessing => "PostProcessing",
            Stage::CleaningUp => "CleaningUp",
            Stage::Terminated(_) => "Terminated",
        }
    }

    /// Status line announced when the stage is entered.
    pub fn description(&self) -> &'static str {
        match self {
            Stage::Idle => "Preparing scratch directory",
            Stage::ValidatingInput => "Validating parameters",
            Stage::MountingSource => "Mounting source filesystem",
            Stage::AnalyzingSource => "Inspecting source files",
            Stage::FormattingTarget => "Preparing target device",
            Stage::WipingTarget => "Wiping existing signatures",
            Stage::PartitioningTarget => "Creating partition table",
            Stage::CreatingFilesystem => "Creating target filesystem",
            Stage::MountingTarget => "Mounting target filesystem",
            Stage::Copying => "Copying files",
            Stage::PostProcessing => "Installing UEFI:NTFS support",
            Stage::CleaningUp => "Cleaning up",
            Stage::Terminated(_) => "Done",
        }
    }

    fn next(&self) -> Option<Stage> {
        let next = match self {
            Stage::Idle => Stage::ValidatingInput,
            Stage::ValidatingInput => Stage::MountingSource,
            Stage::MountingSource => Stage::AnalyzingSource,
            Stage::AnalyzingSource => Stage::FormattingTarget,
            Stage::FormattingTarget => Stage::WipingTarget,
            Stage::WipingTarget => Stage::PartitioningTarget,
            Stage::PartitioningTarget => Stage::CreatingFilesystem,
            Stage::CreatingFilesystem => Stage::MountingTarget,
            Stage::MountingTarget => Stage::Copying,
            Stage::Copying | Stage::PostProcessing => Stage::CleaningUp,
            Stage::CleaningUp | Stage::Terminated(_) => return None,
        };
        Some(next)
    }

    pub fn transition(self, event: StageEvent) -> Result<Stage, IllegalTransition> {
        let illegal = IllegalTransition { from: self, event };
        match (self, event) {
            (Stage::Terminated(_), _) => Err(illegal),
            (Stage::Copying, StageEvent::CompletedNeedsBootSupport) => Ok(Stage::PostProcessing),
            (_, StageEvent::CompletedNeedsBootSupport) => Err(illegal),
            (_, StageEvent::Completed) => self.next().ok_or(illegal),
            (Stage::CleaningUp, StageEvent::Aborted) => Err(illegal),
            (_, StageEvent::Aborted) => Ok(Stage::CleaningUp),
            (Stage::CleaningUp, StageEvent::CleanedUp(outcome)) => Ok(Stage::Terminated(outcome)),
            (_, StageEvent::CleanedUp(_)) => Err(illegal),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Terminated(outcome) => write!(f, "Terminated({})", outcome),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(mut stage: Stage, events: &[StageEvent]) -> Vec<Stage> {
        let mut seen = vec![stage];
        for event in events {
            stage = stage.transition(*event).unwrap();
            seen.push(stage);
        }
        seen
    }

    #[test]
    fn fat32_path_skips_post_processing() {
        let mut events = vec![StageEvent::Completed; 10];
        events.push(StageEvent::CleanedUp(Outcome::Success));
        let seen = walk(Stage::Idle, &events);

        assert_eq!(seen[9], Stage::Copying);
        assert_eq!(seen[10], Stage::CleaningUp);
        assert_eq!(seen[11], Stage::Terminated(Outcome::Success));
        assert!(!seen.contains(&Stage::PostProcessing));
    }

    #[test]
    fn ntfs_path_visits_post_processing() {
        let mut events = vec![StageEvent::Completed; 9];
        events.push(StageEvent::CompletedNeedsBootSupport);
        events.push(StageEvent::Completed);
        let seen = walk(Stage::Idle, &events);

        assert_eq!(seen[10], Stage::PostProcessing);
        assert_eq!(seen[11], Stage::CleaningUp);
    }

    #[test]
    fn every_working_stage_can_abort_to_cleanup() {
        let mut stage = Stage::Idle;
        while stage != Stage::CleaningUp {
            assert_eq!(stage.transition(StageEvent::Aborted), Ok(Stage::CleaningUp));
            stage = stage.transition(StageEvent::Completed).unwrap();
        }
    }

    #[test]
    fn illegal_moves_are_rejected() {
        assert!(Stage::WipingTarget
            .transition(StageEvent::CompletedNeedsBootSupport)
            .is_err());
        assert!(Stage::Copying
            .transition(StageEvent::CleanedUp(Outcome::Success))
            .is_err());
        assert!(Stage::CleaningUp.transition(StageEvent::Completed).is_err());
        assert!(Stage::CleaningUp.transition(StageEvent::Aborted).is_err());
        for event in [
            StageEvent::Completed,
            StageEvent::Aborted,
            StageEvent::CleanedUp(Outcome::Failed),
        ] {
            assert!(Stage::Terminated(Outcome::Success).transition(event).is_err());
        }
    }

    #[test]
    fn destructive_stages_follow_analysis() {
        assert!(!Stage::AnalyzingSource.is_destructive());
        assert!(Stage::WipingTarget.is_destructive());
        assert_eq!(
            Stage::Terminated(Outcome::Cancelled).to_string(),
            "Terminated(cancelled)"
        );
    }
}
