//! Session (component C3): per-file protocol state machine bound to one
//! connection slot.

pub mod bootstrap;
pub mod client_reset;
pub mod compensating;
pub mod progress;
pub mod state;
pub mod upload;

use crate::config::EngineConfig;
use crate::error::{Action, ClientProtocolError, CompensatingWriteError};
use crate::model::{BatchState, ClientFileIdent, SubscriptionSet, SyncProgress};
use crate::protocol::{ClientMessage, DownloadMessage};
use bootstrap::PendingBootstrapStore;
use client_reset::ClientResetOrchestrator;
use compensating::CompensatingWriteQueue;
use state::{ApplicationEvent, ApplicationLevel, TransportLevel};

/// One sync session: the application-facing state for one open realm file.
pub struct Session {
    pub session_ident: u64,
    pub realm_path: std::path::PathBuf,
    pub transport_level: TransportLevel,
    pub application_level: ApplicationLevel,
    pub client_file_ident: Option<ClientFileIdent>,
    pub progress: SyncProgress,
    pub active_subscription: Option<SubscriptionSet>,
    pub pending_bootstraps: PendingBootstrapStore,
    pub compensating_writes: CompensatingWriteQueue,
    pub reset: Option<ClientResetOrchestrator>,
    flexible_sync: bool,
}

/// What the caller should do after handing a DOWNLOAD to `integrate_download`.
pub enum IntegrationOutcome {
    /// Applied immediately; new local client version and surfaced
    /// compensating-write errors that were waiting on this server version.
    Applied {
        new_client_version: u64,
        surfaced_compensating_writes: Vec<CompensatingWriteError>,
    },
    /// Buffered as part of an in-progress query bootstrap; nothing to apply yet.
    Buffered,
    /// The bootstrap just completed; caller should drain and apply the
    /// chunks atomically, then signal the subscription transition.
    BootstrapComplete(crate::model::PendingBootstrap),
}

impl Session {
    pub fn new(session_ident: u64, realm_path: std::path::PathBuf, flexible_sync: bool) -> Self {
        // Discard any bootstrap left partial by a prior process (spec.md §4.3
        // step 3): it can never be resumed since LastInBatch never arrived.
        let mut pending_bootstraps = PendingBootstrapStore::new(bootstrap::sidecar_path_for(&realm_path));
        pending_bootstraps.recover();
        Self {
            session_ident,
            realm_path,
            transport_level: TransportLevel::Unactivated,
            application_level: ApplicationLevel::Inactive,
            client_file_ident: None,
            progress: SyncProgress::default(),
            active_subscription: None,
            pending_bootstraps,
            compensating_writes: CompensatingWriteQueue::default(),
            reset: None,
            flexible_sync,
        }
    }

    pub fn apply_application_event(&mut self, event: ApplicationEvent) -> Result<(), state::IllegalTransition> {
        self.application_level = state::apply(self.application_level, event)?;
        Ok(())
    }

    /// Builds the initial BIND, and if we have no `ClientFileIdent` yet,
    /// the caller must wait for an IDENT from the server before sending
    /// our own IDENT (spec.md §4.3 Message sequence, steps 1-2).
    pub fn bind_message(&self, protocol_version: u32) -> ClientMessage {
        ClientMessage::Bind {
            session_ident: self.session_ident,
            path: self.realm_path.to_string_lossy().into_owned(),
            is_flx: self.flexible_sync,
        }
        .with_version_hint(protocol_version)
    }

    pub fn ident_message(&self) -> Option<ClientMessage> {
        self.client_file_ident.map(|ident| ClientMessage::Ident {
            session_ident: self.session_ident,
            client_file_ident: ident,
        })
    }

    pub fn on_server_ident(&mut self, ident: ClientFileIdent) {
        self.client_file_ident = Some(ident);
    }

    /// Runs download integration step 1-4 from spec.md §4.3.
    pub fn integrate_download(
        &mut self,
        msg: DownloadMessage,
        chunk_bytes: u64,
    ) -> Result<IntegrationOutcome, ClientProtocolError> {
        let self_ident = self.client_file_ident.ok_or(ClientProtocolError::BadOriginFileIdent)?;

        let next_progress = SyncProgress {
            download_server_version: msg.header.download_cursor,
            download_last_integrated_client_version: msg.header.upload_cursor,
            upload_client_version: self.progress.upload_client_version,
            upload_last_integrated_server_version: self.progress.upload_last_integrated_server_version,
            latest_server_version: msg.header.latest_server_version,
        };
        self.progress
            .validate_advance(&next_progress)
            .map_err(|v| ClientProtocolError::BadProgress(format!("{v:?}")))?;

        let is_bootstrap = msg.header.query_version
            > self.active_subscription.as_ref().map(|s| s.version).unwrap_or(0);

        let weak = is_bootstrap;
        let mut last_remote_version = self.progress.download_server_version;
        for cs in &msg.changesets {
            progress::validate_changeset(cs, &self_ident, last_remote_version, self.progress.upload_client_version, weak)?;
            last_remote_version = cs.remote_version;
        }

        self.progress = next_progress;

        if is_bootstrap {
            let batch_state = if msg.header.last_in_batch {
                BatchState::LastInBatch
            } else {
                BatchState::MoreToCome
            };
            let completed = self.pending_bootstraps.append(
                msg.header.query_version,
                batch_state,
                msg.changesets,
                next_progress,
            );
            return Ok(match completed {
                Some(bootstrap) => IntegrationOutcome::BootstrapComplete(bootstrap),
                None => IntegrationOutcome::Buffered,
            });
        }

        let surfaced = self
            .compensating_writes
            .drain_up_to(next_progress.download_server_version);

        Ok(IntegrationOutcome::Applied {
            new_client_version: next_progress.download_last_integrated_client_version,
            surfaced_compensating_writes: surfaced,
        })
    }

    /// Begins the client reset sequence described in spec.md §4.3; called
    /// when a protocol error's action is `ClientReset`/`ClientResetNoRecovery`.
    pub fn begin_client_reset(&mut self, config: &EngineConfig, action: Action, resync_mode: crate::config::ClientResyncMode) {
        let fresh = config.fresh_copy_path(&self.realm_path);
        self.reset = Some(ClientResetOrchestrator::start(
            &self.realm_path,
            fresh,
            resync_mode,
            matches!(action, Action::ClientReset | Action::ClientResetNoRecovery),
        ));
    }
}

trait WithVersionHint {
    fn with_version_hint(self, version: u32) -> Self;
}

impl WithVersionHint for ClientMessage {
    fn with_version_hint(self, _version: u32) -> Self {
        // Protocol version is carried by the WebSocket subprotocol token
        // (crate::protocol::negotiate), not by the BIND body itself.
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_inactive_unactivated() {
        let session = Session::new(1, "/data/default.realm".into(), false);
        assert_eq!(session.transport_level, TransportLevel::Unactivated);
        assert_eq!(session.application_level, ApplicationLevel::Inactive);
        assert!(session.client_file_ident.is_none());
    }

    #[test]
    fn ident_message_absent_until_server_ident_observed() {
        let mut session = Session::new(1, "/data/default.realm".into(), false);
        assert!(session.ident_message().is_none());
        session.on_server_ident(ClientFileIdent::new(7, 42).unwrap());
        assert!(session.ident_message().is_some());
    }
}
