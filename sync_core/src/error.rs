//! Error taxonomies for the sync engine.
//!
//! The four taxonomies below mirror the orthogonal error classes from the
//! design: transport failures, WebSocket close codes, client-detected
//! protocol violations, and server-reported protocol errors. Each variant
//! carries enough context for the propagation policy to be a pure function
//! of the error value, with no re-inspection of the original wire message.

use std::fmt;

/// The directive a server-reported protocol error attaches to its error code.
///
/// Determines what the session must do in response, independent of whether
/// the error is connection-level or session-level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    NoAction,
    ProtocolViolation,
    ApplicationBug,
    Warning,
    Transient,
    DeleteRealm,
    ClientReset,
    ClientResetNoRecovery,
}

impl Action {
    /// Whether this action requires the client reset orchestration in
    /// `crate::session::client_reset`.
    pub fn triggers_client_reset(self) -> bool {
        matches!(self, Action::ClientReset | Action::ClientResetNoRecovery)
    }
}

/// Server-provided parameters for the `server_said_try_again_later` backoff
/// branch of `crate::reconnect`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResumptionDelayInfo {
    pub initial: std::time::Duration,
    pub multiplier: f64,
    pub max: std::time::Duration,
}

/// Why a connection was terminated, the input to the reconnect/backoff
/// controller (`crate::reconnect::BackoffController`).
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationReason {
    ClosedVoluntarily,
    ReadOrWriteError,
    PongTimeout,
    ConnectOperationFailed,
    HttpResponseSaysNonfatalError,
    SyncConnectTimeout,
    ServerSaidTryAgainLater(ResumptionDelayInfo),
    SslCertificateRejected,
    SslProtocolViolation,
    WebsocketProtocolViolation,
    HttpResponseSaysFatalError,
    BadHeaders,
    SyncProtocolViolation,
    ServerSaidDoNotReconnect,
    MissingProtocolFeature,
}

impl TerminationReason {
    /// Fatal reasons never receive another automatic reconnect attempt on
    /// this connection; the caller must be told to stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TerminationReason::SslCertificateRejected
                | TerminationReason::SslProtocolViolation
                | TerminationReason::WebsocketProtocolViolation
                | TerminationReason::HttpResponseSaysFatalError
                | TerminationReason::BadHeaders
                | TerminationReason::SyncProtocolViolation
                | TerminationReason::ServerSaidDoNotReconnect
                | TerminationReason::MissingProtocolFeature
        )
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Transport-level failures: resolving, connecting, reading, writing, TLS.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to resolve or connect to {endpoint}: {source}")]
    ConnectOperationFailed {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("read or write error on connection: {0}")]
    ReadOrWriteError(String),

    #[error("TLS handshake was rejected: {0}")]
    SslCertificateRejected(String),

    #[error("connect operation timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),
}

/// WebSocket-level close handling (spec.md §4.2 close-code table).
#[derive(Debug, thiserror::Error)]
pub enum WebSocketCloseReason {
    #[error("resolve/connect failure")]
    ConnectOperationFailed,
    #[error("read/write error")]
    ReadOrWriteError,
    #[error("protocol-level close: {0}")]
    WebsocketProtocolViolation(String),
    #[error("message too big, client reset required")]
    MessageTooBig,
    #[error("TLS handshake failed")]
    SslCertificateRejected,
    #[error("fatal HTTP response: {0}")]
    HttpResponseFatal(String),
    #[error("non-fatal HTTP response: {0}")]
    HttpResponseNonfatal(String),
}

impl WebSocketCloseReason {
    /// Maps this close reason to the `TerminationReason` the reconnect
    /// controller consumes, and whether the `Action::ClientReset` flag
    /// should be attached (only for `MessageTooBig`).
    pub fn to_termination_reason(&self) -> (TerminationReason, Option<Action>) {
        match self {
            WebSocketCloseReason::ConnectOperationFailed => {
                (TerminationReason::ConnectOperationFailed, None)
            }
            WebSocketCloseReason::ReadOrWriteError => {
                (TerminationReason::ReadOrWriteError, None)
            }
            WebSocketCloseReason::WebsocketProtocolViolation(_) => {
                (TerminationReason::WebsocketProtocolViolation, None)
            }
            WebSocketCloseReason::MessageTooBig => (
                TerminationReason::WebsocketProtocolViolation,
                Some(Action::ClientReset),
            ),
            WebSocketCloseReason::SslCertificateRejected => {
                (TerminationReason::SslCertificateRejected, None)
            }
            WebSocketCloseReason::HttpResponseFatal(_) => {
                (TerminationReason::HttpResponseSaysFatalError, None)
            }
            WebSocketCloseReason::HttpResponseNonfatal(_) => {
                (TerminationReason::HttpResponseSaysNonfatalError, None)
            }
        }
    }
}

/// Client-detected protocol violations (malformed/unexpected messages,
/// broken invariants). Always fatal to the connection they occur on.
#[derive(Debug, thiserror::Error)]
pub enum ClientProtocolError {
    #[error("unknown or malformed message")]
    UnknownMessage,
    #[error("bad changeset: {0}")]
    BadChangeset(String),
    #[error("sync progress invariant violated: {0}")]
    BadProgress(String),
    #[error("server version did not increase monotonically")]
    BadServerVersion,
    #[error("client version bound violated")]
    BadClientVersion,
    #[error("origin file ident equal to self or invalid")]
    BadOriginFileIdent,
    #[error("PONG timestamp did not match last PING")]
    BadTimestamp,
    #[error("PONG was not received before the keepalive timeout")]
    PongTimeout,
    #[error("server selected protocol version we do not support")]
    ProtocolMismatch,
    #[error("server requires a feature this client lacks: {0}")]
    MissingFeature(String),
    #[error("automatic client reset failed: recovery disallowed but server demanded it")]
    AutoClientResetFailure,
}

/// A server-reported protocol-level `ERROR` message, either connection-scoped
/// or session-scoped.
#[derive(Debug, thiserror::Error)]
#[error("server protocol error {raw_error_code}: {message} (action={action:?})")]
pub struct ServerProtocolError {
    pub raw_error_code: i32,
    pub message: String,
    pub try_again: bool,
    pub action: Action,
    pub resumption_delay_info: Option<ResumptionDelayInfo>,
    pub session_ident: Option<u64>,
}

impl ServerProtocolError {
    /// Whether this error is scoped to one session (carries a `session_ident`)
    /// as opposed to the whole connection.
    pub fn is_session_scoped(&self) -> bool {
        self.session_ident.is_some()
    }

    /// An unrecognized `raw_error_code` is still propagated, but flagged.
    pub fn is_recognized(&self) -> bool {
        !matches!(self.action, Action::NoAction) || self.raw_error_code < 200
    }
}

/// Errors carrying a rejected server version, deferred until the matching
/// DOWNLOAD arrives (`crate::session::compensating`).
#[derive(Debug, Clone, thiserror::Error)]
#[error("compensating write rejected at server version {server_version}: {message}")]
pub struct CompensatingWriteError {
    pub server_version: u64,
    pub message: String,
}

/// Top-level error type unifying the four taxonomies, for call sites that can
/// fail for more than one reason (e.g. `Session::integrate_download`).
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    WebSocketClose(#[from] WebSocketCloseReason),
    #[error(transparent)]
    ClientProtocol(#[from] ClientProtocolError),
    #[error(transparent)]
    ServerProtocol(#[from] ServerProtocolError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("(de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// The action to take on a completed session/connection, decided by the
/// propagation policy in spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    None,
    BackupThenDelete,
    Delete,
}
