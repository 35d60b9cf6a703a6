//! Enlist-to-send fairness queue and inbound frame dispatch (spec.md §4.2).
//!
//! The FIFO shape is the same one `yahoo_logic::state::AppState` uses for
//! its oneshot-based command/response bookkeeping, generalized from a
//! single upstream slot to many sessions sharing one connection.

use crate::protocol::ServerMessage;
use std::collections::VecDeque;

/// FIFO of sessions waiting for a turn to write to the shared connection.
/// A session that enlists before another is served before it; a session
/// offered the slot may send nothing, in which case the slot passes on.
#[derive(Debug, Default)]
pub struct EnlistQueue {
    waiting: VecDeque<u64>,
}

impl EnlistQueue {
    pub fn enlist(&mut self, session_ident: u64) {
        if !self.waiting.contains(&session_ident) {
            self.waiting.push_back(session_ident);
        }
    }

    /// Pops the next session due a send slot, if any.
    pub fn next_turn(&mut self) -> Option<u64> {
        self.waiting.pop_front()
    }

    pub fn remove(&mut self, session_ident: u64) {
        self.waiting.retain(|s| *s != session_ident);
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

/// Parses one inbound binary frame into a typed `ServerMessage`.
///
/// Unknown or malformed frames are a sync protocol violation, fatal to the
/// connection (spec.md §4.2 Contracts → Receive).
pub fn parse_frame(bytes: &[u8]) -> Result<ServerMessage, crate::error::ClientProtocolError> {
    serde_json::from_slice::<WireEnvelope>(bytes)
        .ok()
        .and_then(WireEnvelope::into_message)
        .ok_or(crate::error::ClientProtocolError::UnknownMessage)
}

/// A tagged-union envelope used only as a parse target; real binary framing
/// is out of scope for this engine (see spec.md Non-goals), but the shape
/// keeps the dispatch boundary stable for when it is supplied.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "kind")]
enum WireEnvelope {
    Ident { session_ident: u64, ident: u64, salt: i64 },
    Download { session_ident: u64, header: crate::protocol::DownloadHeader },
    Pong { timestamp: i64 },
    Unbound { session_ident: u64 },
    Mark { session_ident: u64, request_ident: u64 },
    Error(crate::protocol::ErrorMessage),
    QueryError { session_ident: u64, query_version: u64, error: crate::protocol::ErrorMessage },
    TestCommandReply { session_ident: u64, id: u64, body: String },
}

impl WireEnvelope {
    fn into_message(self) -> Option<ServerMessage> {
        Some(match self {
            WireEnvelope::Ident { session_ident, ident, salt } => {
                let client_file_ident = crate::model::ClientFileIdent::new(ident, salt)?;
                ServerMessage::Ident { session_ident, client_file_ident }
            }
            WireEnvelope::Download { session_ident, header } => {
                ServerMessage::Download(crate::protocol::DownloadMessage {
                    session_ident,
                    header,
                    changesets: Vec::new(),
                })
            }
            WireEnvelope::Pong { timestamp } => ServerMessage::Pong { timestamp },
            WireEnvelope::Unbound { session_ident } => ServerMessage::Unbound { session_ident },
            WireEnvelope::Mark { session_ident, request_ident } => {
                ServerMessage::Mark { session_ident, request_ident }
            }
            WireEnvelope::Error(e) => ServerMessage::Error(e),
            WireEnvelope::QueryError { session_ident, query_version, error } => {
                ServerMessage::QueryError { session_ident, query_version, error }
            }
            WireEnvelope::TestCommandReply { session_ident, id, body } => {
                ServerMessage::TestCommandReply { session_ident, id, body }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enlist_queue_is_fifo() {
        let mut q = EnlistQueue::default();
        q.enlist(1);
        q.enlist(2);
        q.enlist(3);
        assert_eq!(q.next_turn(), Some(1));
        assert_eq!(q.next_turn(), Some(2));
        assert_eq!(q.next_turn(), Some(3));
        assert_eq!(q.next_turn(), None);
    }

    #[test]
    fn enlist_is_idempotent_per_session() {
        let mut q = EnlistQueue::default();
        q.enlist(1);
        q.enlist(1);
        assert_eq!(q.next_turn(), Some(1));
        assert_eq!(q.next_turn(), None);
    }

    #[test]
    fn unknown_frame_is_rejected() {
        assert!(parse_frame(b"not json").is_err());
    }

    #[test]
    fn pong_frame_parses() {
        let msg = parse_frame(br#"{"kind":"Pong","timestamp":7}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Pong { timestamp: 7 }));
    }

    #[test]
    fn ident_frame_parses() {
        let msg = parse_frame(br#"{"kind":"Ident","session_ident":1,"ident":1234,"salt":42}"#).unwrap();
        match msg {
            ServerMessage::Ident { session_ident, client_file_ident } => {
                assert_eq!(session_ident, 1);
                assert_eq!(client_file_ident.ident, 1234);
                assert_eq!(client_file_ident.salt, 42);
            }
            _ => panic!("expected Ident"),
        }
    }

    #[test]
    fn download_frame_parses() {
        let bytes = br#"{"kind":"Download","session_ident":1,"header":{"download_cursor":1,"upload_cursor":0,"latest_server_version":{"version":1,"salt":1},"downloadable_bytes":0,"last_in_batch":true,"query_version":1,"num_changesets":0}}"#;
        let msg = parse_frame(bytes).unwrap();
        assert!(matches!(msg, ServerMessage::Download(_)));
    }
}
