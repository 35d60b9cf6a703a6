//! Connection (component C2): one WebSocket transport shared by every
//! session bound to the same `ServerEndpoint`, with reconnect/backoff and
//! heartbeat.
//!
//! The event loop shape — a `loop { tokio::select! { ... } }` over a
//! command channel, the read half of the socket, and interval timers,
//! reconnecting on any terminal branch — is grounded on
//! `yahoo_logic::upstream::run`.

pub mod close;
pub mod dispatch;
pub mod heartbeat;

use crate::config::EngineConfig;
use crate::error::{ClientProtocolError, TerminationReason};
use crate::model::ServerEndpoint;
use crate::protocol::{self, ServerMessage};
use crate::reconnect::{BackoffController, ReconnectMode};
use dispatch::EnlistQueue;
use futures_util::{SinkExt, StreamExt};
use heartbeat::PongWait;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Transport-level state machine (spec.md §4.2): the only legal transitions
/// are `disconnected -> connecting -> connected -> disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Orthogonal flags tracked alongside `ConnectionState`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionFlags {
    pub reconnect_delay_in_progress: bool,
    pub disconnect_delay_in_progress: bool,
    pub sending: bool,
    pub waiting_for_pong: bool,
    pub activated: bool,
}

/// A command posted to the connection's event loop from any thread.
pub enum ConnectionCommand {
    Enlist { session_ident: u64, frame: Vec<u8> },
    Activate,
    CancelReconnectDelay,
    Close,
}

/// A notification posted out of the connection to interested sessions.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    Message(ServerMessage),
    Terminated(TerminationReason),
}

/// Handle used by sessions to talk to a running connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<ConnectionCommand>,
}

impl ConnectionHandle {
    pub fn enlist(&self, session_ident: u64, frame: Vec<u8>) {
        let _ = self.commands.send(ConnectionCommand::Enlist { session_ident, frame });
    }

    pub fn activate(&self) {
        let _ = self.commands.send(ConnectionCommand::Activate);
    }

    pub fn cancel_reconnect_delay(&self) {
        let _ = self.commands.send(ConnectionCommand::CancelReconnectDelay);
    }

    pub fn close(&self) {
        let _ = self.commands.send(ConnectionCommand::Close);
    }
}

/// Owns one connection's event loop. All state here is read and mutated
/// only on the task this runs as (spec.md §5's "network event loop" tier).
pub struct Connection {
    endpoint: ServerEndpoint,
    config: EngineConfig,
    flexible_sync: bool,
    state: ConnectionState,
    flags: ConnectionFlags,
    backoff: BackoffController,
    enlist: EnlistQueue,
    pending_frames: HashMap<u64, VecDeque<Vec<u8>>>,
    pong_wait: PongWait,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl Connection {
    pub fn spawn(
        endpoint: ServerEndpoint,
        config: EngineConfig,
        flexible_sync: bool,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> (ConnectionHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mode = match config.reconnect_mode {
            crate::config::ReconnectMode::Normal => ReconnectMode::Normal,
            crate::config::ReconnectMode::Testing => ReconnectMode::TestingImmediate,
        };
        let conn = Connection {
            endpoint,
            config,
            flexible_sync,
            state: ConnectionState::Disconnected,
            flags: ConnectionFlags::default(),
            backoff: BackoffController::new(mode),
            enlist: EnlistQueue::default(),
            pending_frames: HashMap::new(),
            pong_wait: PongWait::default(),
            events,
        };
        let handle = ConnectionHandle { commands: tx };
        let task = tokio::spawn(conn.run(rx));
        (handle, task)
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        let _ = self.events.send(ConnectionEvent::StateChanged(state));
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ConnectionCommand>) {
        loop {
            // Wait for activation before the first connect attempt.
            if !self.flags.activated {
                match commands.recv().await {
                    Some(ConnectionCommand::Activate) => self.flags.activated = true,
                    Some(ConnectionCommand::Close) | None => return,
                    Some(_) => continue,
                }
            }

            self.set_state(ConnectionState::Connecting);
            match self.connect().await {
                Ok(stream) => {
                    self.backoff.note_connected();
                    self.set_state(ConnectionState::Connected);
                    let reason = self.serve(stream, &mut commands).await;
                    self.set_state(ConnectionState::Disconnected);
                    if let Some(reason) = reason {
                        let _ = self.events.send(ConnectionEvent::Terminated(reason.clone()));
                        if reason.is_fatal() {
                            return;
                        }
                        self.wait_out_backoff(&reason, &mut commands).await;
                    } else {
                        return; // closed by explicit Close command
                    }
                }
                Err(reason) => {
                    self.set_state(ConnectionState::Disconnected);
                    let _ = self.events.send(ConnectionEvent::Terminated(reason.clone()));
                    if reason.is_fatal() {
                        return;
                    }
                    self.wait_out_backoff(&reason, &mut commands).await;
                }
            }
        }
    }

    async fn wait_out_backoff(
        &mut self,
        reason: &TerminationReason,
        commands: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
    ) {
        self.flags.reconnect_delay_in_progress = true;
        let delay = self.backoff.next_delay(reason, Instant::now());
        self.backoff.note_attempt_started(Instant::now());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            cmd = commands.recv() => {
                if let Some(ConnectionCommand::CancelReconnectDelay) = cmd {
                    self.backoff.cancel_reconnect_delay();
                }
            }
        }
        self.flags.reconnect_delay_in_progress = false;
    }

    async fn connect(&self) -> Result<WsStream, TerminationReason> {
        let uri: http::Uri = format!("{}://{}:{}", self.endpoint.scheme(), self.endpoint.host, self.endpoint.port)
            .parse()
            .map_err(|_| TerminationReason::BadHeaders)?;

        let subprotocols = protocol::supported_subprotocols(self.flexible_sync).join(", ");
        let request = http::Request::builder()
            .method("GET")
            .uri(uri.clone())
            .header("Host", uri.host().unwrap_or_default())
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Protocol", subprotocols)
            .body(())
            .map_err(|_| TerminationReason::BadHeaders)?;

        tokio::time::timeout(self.config.connect_timeout(), connect_async(request))
            .await
            .map_err(|_| TerminationReason::SyncConnectTimeout)?
            .map(|(stream, _response)| stream)
            .map_err(|_| TerminationReason::ConnectOperationFailed)
    }

    /// Runs the connected phase; returns the termination reason, or `None`
    /// if the caller explicitly closed the connection.
    async fn serve(
        &mut self,
        stream: WsStream,
        commands: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
    ) -> Option<TerminationReason> {
        let (mut write, mut read) = stream.split();
        let mut ping_timer = interval(heartbeat::next_ping_delay(self.config.ping_keepalive_period(), true));
        let mut is_first_ping = true;

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(ConnectionCommand::Enlist { session_ident, frame }) => {
                            self.enlist.enlist(session_ident);
                            self.pending_frames.entry(session_ident).or_default().push_back(frame);

                            // Serve enlisted sessions in FIFO turn order: a session with more
                            // than one frame queued is requeued at the back after each send,
                            // so no single session can hog the slot (spec.md §4.2 Enlist-to-send).
                            while let Some(turn) = self.enlist.next_turn() {
                                let Some(queue) = self.pending_frames.get_mut(&turn) else { continue };
                                let Some(next_frame) = queue.pop_front() else { continue };
                                if queue.is_empty() {
                                    self.pending_frames.remove(&turn);
                                } else {
                                    self.enlist.enlist(turn);
                                }

                                self.flags.sending = true;
                                let result = write.send(WsMessage::Binary(next_frame.into())).await;
                                self.flags.sending = false;
                                if result.is_err() {
                                    return Some(TerminationReason::ReadOrWriteError);
                                }
                            }
                        }
                        Some(ConnectionCommand::CancelReconnectDelay) => {
                            self.backoff.cancel_reconnect_delay();
                            // Arms an urgent PING; only its PONG clears scheduled_reset.
                            let _ = self.send_ping(&mut write).await;
                        }
                        Some(ConnectionCommand::Activate) => {}
                        Some(ConnectionCommand::Close) | None => {
                            let _ = write.close().await;
                            return None;
                        }
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Binary(data))) => {
                            match dispatch::parse_frame(&data) {
                                Ok(ServerMessage::Pong { timestamp }) => {
                                    if let Err(_e @ ClientProtocolError::BadTimestamp) = self.pong_wait.verify(timestamp) {
                                        return Some(TerminationReason::SyncProtocolViolation);
                                    }
                                    self.flags.waiting_for_pong = false;
                                    if self.backoff.scheduled_reset() {
                                        self.backoff.clear_scheduled_reset();
                                    }
                                }
                                Ok(msg) => {
                                    let _ = self.events.send(ConnectionEvent::Message(msg));
                                }
                                Err(_) => return Some(TerminationReason::SyncProtocolViolation),
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            let (code, text) = frame
                                .map(|f| (Some(f.code), f.reason.to_string()))
                                .unwrap_or((None, String::new()));
                            let reason = close::classify(code, &text);
                            let (termination, _action) = close::termination_reason_for(&reason);
                            return Some(termination);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(_)) => return Some(TerminationReason::ReadOrWriteError),
                        None => return Some(TerminationReason::ReadOrWriteError),
                    }
                }
                _ = ping_timer.tick() => {
                    if self.flags.waiting_for_pong {
                        return Some(TerminationReason::PongTimeout);
                    }
                    if self.send_ping(&mut write).await.is_err() {
                        return Some(TerminationReason::ReadOrWriteError);
                    }
                    if is_first_ping {
                        is_first_ping = false;
                        ping_timer = interval(heartbeat::next_ping_delay(self.config.ping_keepalive_period(), false));
                    }
                }
            }
        }
    }

    async fn send_ping<S>(&mut self, write: &mut S) -> Result<(), ()>
    where
        S: futures_util::Sink<WsMessage> + Unpin,
    {
        let timestamp = chrono::Utc::now().timestamp_millis();
        self.pong_wait.arm(timestamp);
        self.flags.waiting_for_pong = true;
        write
            .send(WsMessage::Binary(timestamp.to_be_bytes().to_vec().into()))
            .await
            .map_err(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_starts_disconnected() {
        let flags = ConnectionFlags::default();
        assert!(!flags.activated);
    }
}
