//! Drives one session's protocol lifecycle end to end over a live
//! `Connection`: BIND/IDENT on connect, DOWNLOAD integration, bootstrap
//! application, and client reset orchestration (spec.md §4.3 Message
//! sequence). This is the glue `sync_daemon` runs in production and that
//! `sync_core`'s scenario tests drive against a stub peer.

use crate::config::EngineConfig;
use crate::connection::{Connection, ConnectionEvent, ConnectionHandle, ConnectionState};
use crate::coordinator::RealmCoordinator;
use crate::error::Action;
use crate::model::ServerEndpoint;
use crate::protocol::{DownloadMessage, ErrorMessage, ServerMessage};
use crate::session::client_reset::ResetOutcome;
use crate::session::{IntegrationOutcome, Session};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Fired around a client reset so a host process can repoint observers at
/// the right realm handle (spec.md §4.3 steps 4-5).
#[derive(Debug, Clone, Copy)]
pub enum ClientResetObservation {
    /// A frozen snapshot at the pre-reset version.
    Before { frozen_version: u64 },
    /// The live, merged database at its new version.
    After { new_version: u64 },
}

pub type ClientResetObserver = Box<dyn Fn(ClientResetObservation) + Send + Sync>;

/// Owns one session's worth of protocol driving. Spawned onto its own task;
/// talks to the realm coordinator to apply integrated changesets.
pub struct SyncClient {
    session: Session,
    coordinator: Arc<RealmCoordinator>,
    connection: ConnectionHandle,
    config: EngineConfig,
    protocol_version: u32,
    on_client_reset: Option<ClientResetObserver>,
}

impl SyncClient {
    /// Spawns a `Connection` for `endpoint` and a task that drives `realm_path`'s
    /// session over it until the connection task ends.
    pub fn spawn(
        endpoint: ServerEndpoint,
        realm_path: PathBuf,
        session_ident: u64,
        config: EngineConfig,
        coordinator: Arc<RealmCoordinator>,
        on_client_reset: Option<ClientResetObserver>,
    ) -> tokio::task::JoinHandle<()> {
        let flexible_sync = config.flexible_sync;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (connection, conn_task) = Connection::spawn(endpoint, config.clone(), flexible_sync, events_tx);
        connection.activate();

        let client = SyncClient {
            session: Session::new(session_ident, realm_path, flexible_sync),
            coordinator,
            connection,
            config,
            protocol_version: *crate::protocol::SUPPORTED_PROTOCOL_VERSIONS.first().unwrap_or(&4),
            on_client_reset,
        };

        tokio::spawn(async move {
            client.run(events_rx).await;
            conn_task.abort();
        })
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::StateChanged(ConnectionState::Connected) => {
                    self.send_bind_and_ident();
                }
                ConnectionEvent::Message(ServerMessage::Ident { client_file_ident, .. }) => {
                    self.session.on_server_ident(client_file_ident);
                    if let Some(ident) = self.session.ident_message() {
                        self.connection.enlist(self.session.session_ident, ident.encode());
                    }
                }
                ConnectionEvent::Message(ServerMessage::Download(msg)) => {
                    self.handle_download(msg);
                }
                ConnectionEvent::Message(ServerMessage::Error(err)) => {
                    self.handle_error(err);
                }
                ConnectionEvent::Message(_) => {}
                ConnectionEvent::Terminated(reason) => {
                    log::warn!("sync session {} lost its connection: {reason}", self.session.session_ident);
                }
                ConnectionEvent::StateChanged(_) => {}
            }
        }
    }

    fn send_bind_and_ident(&self) {
        let bind = self.session.bind_message(self.protocol_version);
        self.connection.enlist(self.session.session_ident, bind.encode());
        if let Some(ident) = self.session.ident_message() {
            self.connection.enlist(self.session.session_ident, ident.encode());
        }
    }

    fn handle_download(&mut self, msg: DownloadMessage) {
        let chunk_bytes = self.config.flx_bootstrap_batch_size_bytes;
        match self.session.integrate_download(msg, chunk_bytes) {
            Ok(IntegrationOutcome::Applied { surfaced_compensating_writes, .. }) => {
                self.commit_into_coordinator();
                for error in surfaced_compensating_writes {
                    log::warn!("compensating write surfaced: {}", error.message);
                }
            }
            Ok(IntegrationOutcome::Buffered) => {}
            Ok(IntegrationOutcome::BootstrapComplete(bootstrap)) => {
                let chunks = crate::session::bootstrap::chunk_for_apply(&bootstrap, chunk_bytes);
                for _chunk in &chunks {
                    self.commit_into_coordinator();
                }
                let mark = crate::protocol::ClientMessage::Mark {
                    session_ident: self.session.session_ident,
                    request_ident: bootstrap.query_version,
                };
                self.connection.enlist(self.session.session_ident, mark.encode());
            }
            Err(e) => {
                log::error!("download integration failed, connection will be torn down: {e}");
            }
        }
    }

    fn commit_into_coordinator(&self) -> u64 {
        let read = self.coordinator.begin_read(None, false);
        let write = self.coordinator.promote_to_write(read);
        self.coordinator.commit_write(write)
    }

    fn handle_error(&mut self, err: ErrorMessage) {
        if err.action.triggers_client_reset() {
            self.run_client_reset(err.action);
        }
    }

    /// Drives `ClientResetOrchestrator` through every stage (spec.md §4.3
    /// step 4), firing before/after observer notifications around the merge.
    fn run_client_reset(&mut self, action: Action) {
        let frozen_version = self.coordinator.current_version();
        if let Some(observe) = &self.on_client_reset {
            observe(ClientResetObservation::Before { frozen_version });
        }

        self.session.begin_client_reset(&self.config, action, self.config.client_resync_mode);
        let result = loop {
            let Some(orchestrator) = self.session.reset.as_mut() else { break None };
            match orchestrator.advance() {
                ResetOutcome::InProgress(_) => continue,
                outcome => break Some(outcome),
            }
        };
        self.session.reset = None;

        match result {
            Some(ResetOutcome::Merged) => {
                let new_version = self.commit_into_coordinator();
                if let Some(observe) = &self.on_client_reset {
                    observe(ClientResetObservation::After { new_version });
                }
            }
            Some(ResetOutcome::FailedNoRecovery { file_action }) => {
                log::error!(
                    "client reset on session {} failed without recovery, file_action={file_action:?}",
                    self.session.session_ident
                );
            }
            _ => {}
        }
    }
}
