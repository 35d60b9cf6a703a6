//! Wire message shapes and sub-protocol negotiation (spec.md §6.1).
//!
//! The message enums here are a design-level framing, not a byte-for-byte
//! codec: `encode`/`decode` hand off to `serde_json` the way
//! `yahoo_logic::model` messages are (de)serialized, leaving room for a
//! binary codec to replace the body later without touching call sites.

use crate::error::{Action, ResumptionDelayInfo};
use crate::model::{Changeset, ServerVersionSalt, UploadChangeset};
use serde::{Deserialize, Serialize};

pub const PARTITION_SYNC_PREFIX: &str = "com.mongodb.realm-sync#";
pub const FLEXIBLE_SYNC_PREFIX: &str = "com.mongodb.realm-flx-sync#";

/// Versions this client advertises, highest first. The server picks the
/// highest it also supports; if it picks none or echoes something we did
/// not offer, that is fatal (`ClientProtocolError::ProtocolMismatch`).
pub const SUPPORTED_PROTOCOL_VERSIONS: &[u32] = &[4, 3];

/// Builds the descending `Sec-WebSocket-Protocol` candidate list for a
/// given sync mode.
pub fn supported_subprotocols(flexible: bool) -> Vec<String> {
    let prefix = if flexible { FLEXIBLE_SYNC_PREFIX } else { PARTITION_SYNC_PREFIX };
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .map(|v| format!("{prefix}{v}"))
        .collect()
}

/// Parses a server-echoed subprotocol token and validates it was one we
/// offered.
pub fn negotiate(echoed: &str, flexible: bool) -> Result<u32, crate::error::ClientProtocolError> {
    let prefix = if flexible { FLEXIBLE_SYNC_PREFIX } else { PARTITION_SYNC_PREFIX };
    let version = echoed
        .strip_prefix(prefix)
        .and_then(|rest| rest.parse::<u32>().ok())
        .ok_or(crate::error::ClientProtocolError::ProtocolMismatch)?;
    if SUPPORTED_PROTOCOL_VERSIONS.contains(&version) {
        Ok(version)
    } else {
        Err(crate::error::ClientProtocolError::ProtocolMismatch)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadHeader {
    pub download_cursor: u64,
    pub upload_cursor: u64,
    pub latest_server_version: ServerVersionSalt,
    pub downloadable_bytes: u64,
    pub last_in_batch: bool,
    pub query_version: u64,
    pub num_changesets: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadMessage {
    pub session_ident: u64,
    pub header: DownloadHeader,
    #[serde(skip)]
    pub changesets: Vec<Changeset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub raw_error_code: i32,
    pub message: String,
    pub try_again: bool,
    pub action: Action,
    pub resumption_delay_info: Option<ResumptionDelayInfo>,
    pub session_ident: Option<u64>,
}

impl serde::Serialize for Action {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let name = match self {
            Action::NoAction => "NoAction",
            Action::ProtocolViolation => "ProtocolViolation",
            Action::ApplicationBug => "ApplicationBug",
            Action::Warning => "Warning",
            Action::Transient => "Transient",
            Action::DeleteRealm => "DeleteRealm",
            Action::ClientReset => "ClientReset",
            Action::ClientResetNoRecovery => "ClientResetNoRecovery",
        };
        s.serialize_str(name)
    }
}

impl<'de> serde::Deserialize<'de> for Action {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ok(match s.as_str() {
            "ProtocolViolation" => Action::ProtocolViolation,
            "ApplicationBug" => Action::ApplicationBug,
            "Warning" => Action::Warning,
            "Transient" => Action::Transient,
            "DeleteRealm" => Action::DeleteRealm,
            "ClientReset" => Action::ClientReset,
            "ClientResetNoRecovery" => Action::ClientResetNoRecovery,
            _ => Action::NoAction,
        })
    }
}

impl serde::Serialize for ResumptionDelayInfo {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut st = s.serialize_struct("ResumptionDelayInfo", 3)?;
        st.serialize_field("initial_ms", &(self.initial.as_millis() as u64))?;
        st.serialize_field("multiplier", &self.multiplier)?;
        st.serialize_field("max_ms", &(self.max.as_millis() as u64))?;
        st.end()
    }
}

impl<'de> serde::Deserialize<'de> for ResumptionDelayInfo {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            initial_ms: u64,
            multiplier: f64,
            max_ms: u64,
        }
        let raw = Raw::deserialize(d)?;
        Ok(ResumptionDelayInfo {
            initial: std::time::Duration::from_millis(raw.initial_ms),
            multiplier: raw.multiplier,
            max: std::time::Duration::from_millis(raw.max_ms),
        })
    }
}

/// Client-to-server messages (spec.md §6.1).
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Bind { session_ident: u64, path: String, is_flx: bool },
    Ident { session_ident: u64, client_file_ident: crate::model::ClientFileIdent },
    Upload { session_ident: u64, changesets: Vec<UploadChangeset> },
    Query { session_ident: u64, query_version: u64, queries: Vec<String> },
    Mark { session_ident: u64, request_ident: u64 },
    Unbind { session_ident: u64 },
    Ping { timestamp: i64 },
    TestCommand { session_ident: u64, id: u64, body: String },
    ClientError { session_ident: u64, message: String },
}

/// Server-to-client messages.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Ident { session_ident: u64, client_file_ident: crate::model::ClientFileIdent },
    Download(DownloadMessage),
    Mark { session_ident: u64, request_ident: u64 },
    Unbound { session_ident: u64 },
    Pong { timestamp: i64 },
    Error(ErrorMessage),
    QueryError { session_ident: u64, query_version: u64, error: ErrorMessage },
    TestCommandReply { session_ident: u64, id: u64, body: String },
}

/// Outbound wire envelope, the `ClientMessage` counterpart of
/// `crate::connection::dispatch::WireEnvelope`. Changeset payloads are out
/// of scope for this JSON framing (see spec.md Non-goals on the wire codec)
/// and are summarized by count rather than serialized, mirroring how
/// `DownloadMessage::changesets` is `#[serde(skip)]` on the inbound side.
#[derive(Debug, Serialize)]
#[serde(tag = "kind")]
enum WireClientEnvelope {
    Bind { session_ident: u64, path: String, is_flx: bool },
    Ident { session_ident: u64, ident: u64, salt: i64 },
    Upload { session_ident: u64, progress_client_version: u64, num_changesets: u32 },
    Query { session_ident: u64, query_version: u64, queries: Vec<String> },
    Mark { session_ident: u64, request_ident: u64 },
    Unbind { session_ident: u64 },
    Ping { timestamp: i64 },
    TestCommand { session_ident: u64, id: u64, body: String },
    ClientError { session_ident: u64, message: String },
}

impl ClientMessage {
    /// Encodes this message as the JSON frame the dispatch module's
    /// `WireEnvelope` decodes on the server side of a test stub, or a real
    /// server speaking the same framing.
    pub fn encode(&self) -> Vec<u8> {
        let envelope = match self {
            ClientMessage::Bind { session_ident, path, is_flx } => WireClientEnvelope::Bind {
                session_ident: *session_ident,
                path: path.clone(),
                is_flx: *is_flx,
            },
            ClientMessage::Ident { session_ident, client_file_ident } => WireClientEnvelope::Ident {
                session_ident: *session_ident,
                ident: client_file_ident.ident,
                salt: client_file_ident.salt,
            },
            ClientMessage::Upload { session_ident, changesets } => WireClientEnvelope::Upload {
                session_ident: *session_ident,
                progress_client_version: changesets.last().map(|c| c.client_version).unwrap_or(0),
                num_changesets: changesets.len() as u32,
            },
            ClientMessage::Query { session_ident, query_version, queries } => WireClientEnvelope::Query {
                session_ident: *session_ident,
                query_version: *query_version,
                queries: queries.clone(),
            },
            ClientMessage::Mark { session_ident, request_ident } => WireClientEnvelope::Mark {
                session_ident: *session_ident,
                request_ident: *request_ident,
            },
            ClientMessage::Unbind { session_ident } => {
                WireClientEnvelope::Unbind { session_ident: *session_ident }
            }
            ClientMessage::Ping { timestamp } => WireClientEnvelope::Ping { timestamp: *timestamp },
            ClientMessage::TestCommand { session_ident, id, body } => WireClientEnvelope::TestCommand {
                session_ident: *session_ident,
                id: *id,
                body: body.clone(),
            },
            ClientMessage::ClientError { session_ident, message } => WireClientEnvelope::ClientError {
                session_ident: *session_ident,
                message: message.clone(),
            },
        };
        serde_json::to_vec(&envelope).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_accepts_offered_version() {
        assert_eq!(negotiate("com.mongodb.realm-sync#4", false), Ok(4));
    }

    #[test]
    fn negotiate_rejects_unoffered_version() {
        assert!(negotiate("com.mongodb.realm-sync#99", false).is_err());
    }

    #[test]
    fn negotiate_rejects_wrong_prefix() {
        assert!(negotiate("com.mongodb.realm-flx-sync#4", false).is_err());
    }

    #[test]
    fn subprotocol_list_is_descending() {
        let list = supported_subprotocols(true);
        assert_eq!(list[0], "com.mongodb.realm-flx-sync#4");
    }
}
