//! WebSocket close-code classification (spec.md §4.2 close-handling table).

use crate::error::{Action, TerminationReason, WebSocketCloseReason};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Classifies a close frame's code into the reason/fatality table.
pub fn classify(code: Option<CloseCode>, reason_text: &str) -> WebSocketCloseReason {
    let Some(code) = code else {
        return WebSocketCloseReason::ReadOrWriteError;
    };
    match code {
        CloseCode::Away | CloseCode::Protocol | CloseCode::Unsupported | CloseCode::Invalid
        | CloseCode::Policy | CloseCode::Extension | CloseCode::Reserved => {
            WebSocketCloseReason::WebsocketProtocolViolation(reason_text.to_string())
        }
        CloseCode::Size => WebSocketCloseReason::MessageTooBig,
        CloseCode::Abnormal => WebSocketCloseReason::HttpResponseNonfatal(reason_text.to_string()),
        _ => WebSocketCloseReason::ReadOrWriteError,
    }
}

/// Classifies an HTTP status observed during the WebSocket upgrade attempt.
pub fn classify_http_status(status: u16) -> Option<WebSocketCloseReason> {
    match status {
        // client-too-old / client-too-new / protocol-mismatch / forbidden / retry-error
        426 | 403 | 404 => Some(WebSocketCloseReason::HttpResponseFatal(status.to_string())),
        401 | 301 | 500 | 502 | 503 => {
            Some(WebSocketCloseReason::HttpResponseNonfatal(status.to_string()))
        }
        302 | 307 => None, // not followed; surfaced separately as a misconfiguration
        _ => None,
    }
}

pub fn termination_reason_for(reason: &WebSocketCloseReason) -> (TerminationReason, Option<Action>) {
    reason.to_termination_reason()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_close_is_transient_violation() {
        let reason = classify(Some(CloseCode::Protocol), "bad frame");
        assert!(matches!(reason, WebSocketCloseReason::WebsocketProtocolViolation(_)));
        let (term, action) = termination_reason_for(&reason);
        assert_eq!(term, TerminationReason::WebsocketProtocolViolation);
        assert!(action.is_none());
    }

    #[test]
    fn message_too_big_carries_client_reset_action() {
        let reason = classify(Some(CloseCode::Size), "");
        let (_, action) = termination_reason_for(&reason);
        assert_eq!(action, Some(Action::ClientReset));
    }

    #[test]
    fn missing_close_code_is_read_write_error() {
        assert!(matches!(classify(None, ""), WebSocketCloseReason::ReadOrWriteError));
    }

    #[test]
    fn fatal_http_status_maps_to_fatal_reason() {
        let reason = classify_http_status(426).unwrap();
        let (term, _) = termination_reason_for(&reason);
        assert!(term.is_fatal());
    }
}
