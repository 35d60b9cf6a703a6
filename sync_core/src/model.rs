//! Core data model: the entities and invariants from spec.md §3.

use std::time::{Duration, Instant};

/// The wire envelope a `ServerEndpoint` is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolEnvelope {
    PlainWs,
    TlsWs,
    Realm,
    Realms,
}

/// `(envelope, host, port)`: the equality key connections are reused by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerEndpoint {
    pub envelope: ProtocolEnvelope,
    pub host: String,
    pub port: u16,
}

impl ServerEndpoint {
    pub fn new(envelope: ProtocolEnvelope, host: impl Into<String>, port: u16) -> Self {
        Self {
            envelope,
            host: host.into(),
            port,
        }
    }

    /// Scheme used when building the HTTP upgrade request in
    /// `crate::connection::connect`.
    pub fn scheme(&self) -> &'static str {
        match self.envelope {
            ProtocolEnvelope::PlainWs | ProtocolEnvelope::Realm => "ws",
            ProtocolEnvelope::TlsWs | ProtocolEnvelope::Realms => "wss",
        }
    }
}

/// Server-assigned file identity, persisted in local history. Immutable once
/// set, except by a client reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientFileIdent {
    pub ident: u64,
    pub salt: i64,
}

impl ClientFileIdent {
    /// `ident` must be `> 0` and `salt` must be nonzero; the server never
    /// sends a zero-valued ident once assigned.
    pub fn new(ident: u64, salt: i64) -> Option<Self> {
        if ident == 0 || salt == 0 {
            None
        } else {
            Some(Self { ident, salt })
        }
    }
}

/// `(version, salt)`, as delivered in the DOWNLOAD header's
/// `latest_server_version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ServerVersionSalt {
    pub version: u64,
    pub salt: i64,
}

/// The four monotone cursors plus the latest-known server version, per
/// spec.md §3. All four `u64` cursors are weakly increasing within a
/// session's lifetime; violation is `ClientProtocolError::BadProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct SyncProgress {
    pub download_server_version: u64,
    pub download_last_integrated_client_version: u64,
    pub upload_client_version: u64,
    pub upload_last_integrated_server_version: u64,
    pub latest_server_version: ServerVersionSalt,
}

impl SyncProgress {
    /// Validates the four monotonicity/bound invariants of spec.md §3 and
    /// §4.3 step 1 against a previously observed progress value. Returns the
    /// first violated invariant, numbered as in the design note.
    pub fn validate_advance(&self, next: &SyncProgress) -> Result<(), ProgressViolation> {
        if next.download_server_version < self.download_server_version {
            return Err(ProgressViolation::DownloadServerVersionDecreased);
        }
        if next.download_last_integrated_client_version < self.download_last_integrated_client_version {
            return Err(ProgressViolation::DownloadLastIntegratedClientVersionDecreased);
        }
        if next.upload_client_version < self.upload_client_version {
            return Err(ProgressViolation::UploadClientVersionDecreased);
        }
        if next.upload_last_integrated_server_version < self.upload_last_integrated_server_version {
            return Err(ProgressViolation::UploadLastIntegratedServerVersionDecreased);
        }
        if next.latest_server_version.version < self.latest_server_version.version {
            return Err(ProgressViolation::LatestServerVersionDecreased);
        }
        if next.download_server_version > next.latest_server_version.version {
            return Err(ProgressViolation::DownloadExceedsLatest);
        }
        if next.download_last_integrated_client_version > next.upload_client_version {
            return Err(ProgressViolation::DownloadAheadOfUpload);
        }
        Ok(())
    }
}

/// Which of the seven numbered `SyncProgress` invariants (spec.md §4.3 step 1)
/// was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressViolation {
    DownloadServerVersionDecreased,
    DownloadLastIntegratedClientVersionDecreased,
    UploadClientVersionDecreased,
    UploadLastIntegratedServerVersionDecreased,
    LatestServerVersionDecreased,
    DownloadExceedsLatest,
    DownloadAheadOfUpload,
}

/// Which batch position a DOWNLOAD message occupies within a query bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Not part of a bootstrap; apply immediately.
    Steady,
    MoreToCome,
    LastInBatch,
}

/// One inbound changeset, a record within a DOWNLOAD message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Changeset {
    pub remote_version: u64,
    pub last_integrated_local_version: u64,
    pub origin_file_ident: u64,
    pub origin_timestamp: i64,
    pub payload: Vec<u8>,
}

/// One outbound changeset, a record within an UPLOAD message.
#[derive(Debug, Clone)]
pub struct UploadChangeset {
    pub client_version: u64,
    pub last_integrated_server_version: u64,
    pub origin_timestamp: i64,
    pub origin_file_ident: u64,
    pub payload: Vec<u8>,
}

/// Lifecycle states of one version of a flexible-sync subscription set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Uncommitted,
    Pending,
    Bootstrapping,
    AwaitingMark,
    Complete,
    Error,
    Superseded,
}

/// An immutable, versioned tuple of queries (flexible sync).
#[derive(Debug, Clone)]
pub struct SubscriptionSet {
    pub version: u64,
    pub queries: Vec<String>,
    pub state: SubscriptionState,
}

impl SubscriptionSet {
    pub fn new(version: u64, queries: Vec<String>) -> Self {
        Self {
            version,
            queries,
            state: SubscriptionState::Uncommitted,
        }
    }
}

/// On-disk buffer of inbound changesets for one query-version bootstrap.
/// A batch is never applied until `last_in_batch` has been stored; a partial
/// batch surviving a restart is discarded by `PendingBootstrapStore::recover`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PendingBootstrap {
    pub query_version: u64,
    pub changesets: Vec<Changeset>,
    pub final_progress: Option<SyncProgress>,
    pub last_in_batch_received: bool,
}

/// A queued asynchronous write request handed to the realm coordinator.
pub struct AsyncWriteRequest {
    pub handle: u64,
    pub notify_only: bool,
    pub writer: Box<dyn FnOnce() -> Result<(), String> + Send>,
}

/// A queued asynchronous commit request.
pub struct AsyncCommitRequest {
    pub handle: u64,
    pub allow_grouping: bool,
    pub when_completed: Box<dyn FnOnce(Result<(), String>) + Send>,
}

/// A set of pre-computed change-sets bound to a target version, handed off
/// from the notifier worker to a reader pinned at that version.
#[derive(Debug, Clone)]
pub struct NotifierPackage {
    pub target_version: u64,
    pub change_sets: Vec<Vec<u8>>,
}

/// Per-endpoint reconnect bookkeeping (spec.md §3's `ReconnectInfo`).
#[derive(Debug, Clone)]
pub struct ReconnectInfo {
    pub last_termination: Option<crate::error::TerminationReason>,
    pub scheduled_at: Option<Instant>,
    pub last_delay: Duration,
    pub resumption_delay_info: Option<crate::error::ResumptionDelayInfo>,
    pub scheduled_reset: bool,
}

impl Default for ReconnectInfo {
    fn default() -> Self {
        Self {
            last_termination: None,
            scheduled_at: None,
            last_delay: Duration::ZERO,
            resumption_delay_info: None,
            scheduled_reset: false,
        }
    }
}
