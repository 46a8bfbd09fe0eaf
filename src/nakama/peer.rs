//! Nakama peer
//!
//! The outbound half of the mesh: one client WebSocket to the configured
//! host, authenticated with the shared password on the handshake. Requests
//! are correlated to replies by request id; the connection reconnects with
//! capped exponential backoff and answers host pings to stay fresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::message::{Envelope, MessageType};
use crate::events::{EventBus, WsEvent};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Shared {
    state: Mutex<PeerConnectionState>,
    pending: Mutex<HashMap<String, oneshot::Sender<Envelope>>>,
    out_tx: Mutex<Option<mpsc::Sender<Envelope>>>,
    events: EventBus,
}

/// Handle to the peer connection task.
#[derive(Clone)]
pub struct NakamaPeer {
    shared: Arc<Shared>,
}

impl NakamaPeer {
    /// Spawn the connection loop against `url` (e.g. "ws://host:43211").
    pub fn start(url: String, password: String, username: String, events: EventBus) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(PeerConnectionState::Disconnected),
            pending: Mutex::new(HashMap::new()),
            out_tx: Mutex::new(None),
            events,
        });
        let peer = Self {
            shared: shared.clone(),
        };
        tokio::spawn(run_loop(shared, url, password, username));
        peer
    }

    pub fn state(&self) -> PeerConnectionState {
        *self.shared.state.lock()
    }

    /// Fire-and-forget send.
    pub fn send(&self, envelope: Envelope) {
        let tx = self.shared.out_tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.try_send(envelope);
        }
    }

    /// Request/response round trip over the socket.
    pub async fn request(
        &self,
        kind: MessageType,
        payload: serde_json::Value,
    ) -> Result<Envelope> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .insert(request_id.clone(), reply_tx);

        let envelope = Envelope::new(kind, payload).with_request_id(Some(request_id.clone()));
        let tx = self
            .shared
            .out_tx
            .lock()
            .clone()
            .context("Not connected to host")?;
        tx.send(envelope).await.context("Host connection closed")?;

        let reply = tokio::time::timeout(REQUEST_TIMEOUT, reply_rx)
            .await
            .map_err(|_| {
                self.shared.pending.lock().remove(&request_id);
                anyhow::anyhow!("Host did not reply in time")
            })?
            .context("Connection dropped while waiting for reply")?;
        if reply.kind == MessageType::Error {
            anyhow::bail!(
                "Host error: {}",
                reply.payload["message"].as_str().unwrap_or("unknown")
            );
        }
        Ok(reply)
    }

    /// The host's shared library snapshot.
    pub async fn library_snapshot(&self) -> Result<serde_json::Value> {
        let reply = self
            .request(MessageType::LibraryRequest, serde_json::Value::Null)
            .await?;
        Ok(reply.payload)
    }

    /// Ask for the proxied stream URL of a host file.
    pub async fn stream_url(&self, path: &str) -> Result<String> {
        let reply = self
            .request(
                MessageType::StreamPlayRequest,
                serde_json::json!({ "path": path }),
            )
            .await?;
        reply.payload["url"]
            .as_str()
            .map(|s| s.to_string())
            .context("Host reply had no stream URL")
    }

    pub async fn join_watch_party(&self) -> Result<()> {
        self.send(Envelope::new(
            MessageType::WatchPartyJoin,
            serde_json::Value::Null,
        ));
        Ok(())
    }
}

async fn run_loop(shared: Arc<Shared>, url: String, password: String, username: String) {
    let ws_url = format!("{}/api/v1/nakama/ws", url.trim_end_matches('/'));
    let mut delay = Duration::from_secs(1);

    loop {
        *shared.state.lock() = PeerConnectionState::Connecting;
        match connect_once(&shared, &ws_url, &password, &username).await {
            Ok(()) => {
                // Clean disconnect; reconnect promptly.
                delay = Duration::from_secs(1);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Host connection failed");
                delay = (delay * 2).min(MAX_RECONNECT_DELAY);
            }
        }
        *shared.state.lock() = PeerConnectionState::Disconnected;
        *shared.out_tx.lock() = None;
        shared.pending.lock().clear();
        tokio::time::sleep(delay).await;
    }
}

async fn connect_once(
    shared: &Arc<Shared>,
    ws_url: &str,
    password: &str,
    username: &str,
) -> Result<()> {
    let (stream, _) = connect_async(ws_url)
        .await
        .context("WebSocket connect failed")?;
    let (mut write, mut read) = stream.split();

    // Authenticate before anything else.
    let auth = Envelope::new(
        MessageType::Auth,
        serde_json::json!({ "password": password, "username": username }),
    );
    write
        .send(Message::Text(auth.to_text().into()))
        .await
        .context("Auth send failed")?;

    let first = tokio::time::timeout(Duration::from_secs(10), read.next())
        .await
        .context("Host did not answer auth")?;
    let reply = match first {
        Some(Ok(Message::Text(text))) => Envelope::parse(&text),
        _ => None,
    };
    match reply {
        Some(e) if e.kind == MessageType::AuthReply => {}
        Some(e) if e.kind == MessageType::Error => {
            anyhow::bail!(
                "Host rejected connection: {}",
                e.payload["message"].as_str().unwrap_or("unknown")
            );
        }
        _ => anyhow::bail!("Unexpected auth response"),
    }

    let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(64);
    *shared.out_tx.lock() = Some(out_tx.clone());
    *shared.state.lock() = PeerConnectionState::Connected;
    shared.events.notify("success", "Connected to nakama host");
    tracing::info!(url = ws_url, "Connected to nakama host");

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                let Some(envelope) = outbound else { return Ok(()) };
                write
                    .send(Message::Text(envelope.to_text().into()))
                    .await
                    .context("Send to host failed")?;
            }
            inbound = read.next() => {
                let text = match inbound {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        shared.events.notify("warning", "Nakama host disconnected");
                        return Ok(());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e).context("Host socket error"),
                };
                let Some(envelope) = Envelope::parse(&text) else { continue };

                // Replies resolve their pending request; everything else is
                // surfaced as an event.
                if let Some(request_id) = envelope.request_id.clone() {
                    if let Some(waiter) = shared.pending.lock().remove(&request_id) {
                        let _ = waiter.send(envelope);
                        continue;
                    }
                }
                match envelope.kind {
                    MessageType::Ping => {
                        let _ = out_tx
                            .send(Envelope::new(MessageType::Pong, serde_json::Value::Null))
                            .await;
                    }
                    MessageType::WatchPartyState
                    | MessageType::WatchPartyCreated
                    | MessageType::WatchPartyPlaybackStatus
                    | MessageType::WatchPartySeek
                    | MessageType::WatchPartyStopped => {
                        shared
                            .events
                            .send(WsEvent::NakamaWatchPartyState(envelope.payload));
                    }
                    _ => {
                        tracing::debug!(kind = ?envelope.kind, "Unhandled host message");
                    }
                }
            }
        }
    }
}
