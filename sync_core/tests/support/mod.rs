//! In-process stub WebSocket peer for scenario tests that need to drive the
//! real `Connection`/`SyncClient` event loop end to end, rather than calling
//! the component APIs directly.
//!
//! Grounded on `yahoo_logic::downstream::run`'s `axum` `ws` route: an
//! `axum::extract::ws::WebSocketUpgrade` bound to `127.0.0.1:0`, with each
//! accepted socket handed off as a pair of channels so a test can script
//! inbound/outbound frames without touching axum or tungstenite types.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// One accepted client connection, handed to the test to script.
pub struct PeerConnection {
    pub inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    pub outbound: mpsc::UnboundedSender<PeerCommand>,
}

pub enum PeerCommand {
    Send(Vec<u8>),
    /// While `true`, inbound 8-byte heartbeat PINGs are not answered (used
    /// by the PONG-timeout scenario).
    DropPongs(bool),
}

#[derive(Clone)]
struct SharedState {
    accepted: Arc<Mutex<mpsc::UnboundedSender<PeerConnection>>>,
}

pub struct StubPeer {
    pub addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<PeerConnection>,
    server_task: tokio::task::JoinHandle<()>,
}

impl StubPeer {
    pub async fn bind() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let state = SharedState { accepted: Arc::new(Mutex::new(accepted_tx)) };
        let app = Router::new().route("/ws", get(ws_handler)).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind stub peer");
        let addr = listener.local_addr().expect("local addr");
        let server_task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        StubPeer { addr, accepted: accepted_rx, server_task }
    }

    /// Waits for the next client WebSocket upgrade.
    pub async fn accept(&mut self) -> PeerConnection {
        tokio::time::timeout(std::time::Duration::from_secs(5), self.accepted.recv())
            .await
            .expect("client never connected within timeout")
            .expect("stub peer server task ended")
    }
}

impl Drop for StubPeer {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: SharedState) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    {
        let accepted = state.accepted.lock().await;
        if accepted.send(PeerConnection { inbound: inbound_rx, outbound: outbound_tx }).is_err() {
            return;
        }
    }

    let mut drop_pongs = false;
    loop {
        tokio::select! {
            frame = socket.next() => {
                match frame {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() == 8 {
                            if !drop_pongs {
                                let timestamp = i64::from_be_bytes(data[..8].try_into().unwrap());
                                let pong = serde_json::json!({"kind": "Pong", "timestamp": timestamp});
                                if socket.send(Message::Binary(serde_json::to_vec(&pong).unwrap().into())).await.is_err() {
                                    break;
                                }
                            }
                        } else {
                            let _ = inbound_tx.send(data.to_vec());
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            cmd = outbound_rx.recv() => {
                match cmd {
                    Some(PeerCommand::Send(bytes)) => {
                        if socket.send(Message::Binary(bytes.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(PeerCommand::DropPongs(v)) => drop_pongs = v,
                    None => break,
                }
            }
        }
    }
}
