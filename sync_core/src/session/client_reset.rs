//! Client reset orchestration (spec.md §4.3 Client reset orchestration).

use crate::config::ClientResyncMode;
use crate::error::FileAction;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStage {
    OpenFreshDatabase,
    WaitForFreshSessionComplete,
    CloseFreshSession,
    MergeIntoOriginal,
    Done,
}

/// Drives the five-step client reset sequence from the design note. Owns no
/// I/O itself; each `advance` call is told the outcome of the previous
/// stage's async work and returns the next stage to run, or the terminal
/// outcome.
pub struct ClientResetOrchestrator {
    fresh_copy_path: PathBuf,
    resync_mode: ClientResyncMode,
    stage: ResetStage,
    server_demanded_recovery: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetOutcome {
    InProgress(ResetStage),
    Merged,
    FailedNoRecovery { file_action: FileAction },
}

impl ClientResetOrchestrator {
    pub fn start(realm_path: &Path, fresh_copy_path: PathBuf, resync_mode: ClientResyncMode, server_demanded_recovery: bool) -> Self {
        let _ = realm_path;
        Self {
            fresh_copy_path,
            resync_mode,
            stage: ResetStage::OpenFreshDatabase,
            server_demanded_recovery,
        }
    }

    pub fn fresh_copy_path(&self) -> &Path {
        &self.fresh_copy_path
    }

    /// If recovery is disallowed (`Manual` or `DiscardLocal`) but the
    /// server demanded it, the reset fails without recovery: surfaced as
    /// `auto_client_reset_failure` and the file marked backup-then-delete.
    pub fn recovery_allowed(&self) -> bool {
        matches!(self.resync_mode, ClientResyncMode::Recover | ClientResyncMode::RecoverOrDiscard)
    }

    pub fn advance(&mut self) -> ResetOutcome {
        if self.server_demanded_recovery && !self.recovery_allowed() {
            return ResetOutcome::FailedNoRecovery { file_action: FileAction::BackupThenDelete };
        }
        self.stage = match self.stage {
            ResetStage::OpenFreshDatabase => ResetStage::WaitForFreshSessionComplete,
            ResetStage::WaitForFreshSessionComplete => ResetStage::CloseFreshSession,
            ResetStage::CloseFreshSession => ResetStage::MergeIntoOriginal,
            ResetStage::MergeIntoOriginal => ResetStage::Done,
            ResetStage::Done => return ResetOutcome::Merged,
        };
        if self.stage == ResetStage::Done {
            ResetOutcome::Merged
        } else {
            ResetOutcome::InProgress(self.stage)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progresses_through_all_stages_to_merged() {
        let mut orch = ClientResetOrchestrator::start(
            Path::new("/data/default.realm"),
            PathBuf::from("/data/default.realm.fresh"),
            ClientResyncMode::Recover,
            false,
        );
        let mut outcomes = vec![];
        for _ in 0..4 {
            outcomes.push(orch.advance());
        }
        assert_eq!(outcomes.last(), Some(&ResetOutcome::Merged));
    }

    #[test]
    fn fails_without_recovery_when_disallowed_but_demanded() {
        let mut orch = ClientResetOrchestrator::start(
            Path::new("/data/default.realm"),
            PathBuf::from("/data/default.realm.fresh"),
            ClientResyncMode::Manual,
            true,
        );
        assert_eq!(
            orch.advance(),
            ResetOutcome::FailedNoRecovery { file_action: FileAction::BackupThenDelete }
        );
    }
}
