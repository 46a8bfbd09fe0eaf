//! Nakama host
//!
//! Accepts peer WebSocket connections on the API port. Every socket
//! authenticates with the shared password before anything else is routed.
//! Outbound messages go through a bounded per-connection queue drained by a
//! writer task; a full queue drops the peer (backpressure), and peers that
//! miss the pong deadline are marked stale and removed. Messages within a
//! socket stay FIFO; across sockets only reply-after-request holds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::message::{Envelope, MessageType};
use super::watch_party::{WatchPartyManager, WatchPartySettings};
use crate::db::Database;
use crate::events::{EventBus, WsEvent};
use crate::library::{LibraryStore, build_entries};
use crate::platform::Platform;

/// Outbound queue per peer; overflow drops the connection.
const PEER_QUEUE_SIZE: usize = 64;
const PING_INTERVAL: Duration = Duration::from_secs(20);
const PONG_DEADLINE: Duration = Duration::from_secs(50);

struct PeerHandle {
    peer_id: String,
    username: String,
    tx: mpsc::Sender<Envelope>,
    last_pong: Instant,
}

#[derive(Clone)]
pub struct NakamaHost {
    db: Database,
    events: EventBus,
    store: LibraryStore,
    platform: Platform,
    pub watch_party: Arc<WatchPartyManager>,
    peers: Arc<RwLock<HashMap<String, PeerHandle>>>,
}

impl NakamaHost {
    pub fn new(
        db: Database,
        events: EventBus,
        store: LibraryStore,
        platform: Platform,
    ) -> Self {
        let host = Self {
            db,
            watch_party: Arc::new(WatchPartyManager::new(events.clone())),
            events,
            store,
            platform,
            peers: Arc::new(RwLock::new(HashMap::new())),
        };
        host.spawn_ping_loop();
        host
    }

    pub fn connected_peers(&self) -> Vec<(String, String)> {
        self.peers
            .read()
            .values()
            .map(|p| (p.peer_id.clone(), p.username.clone()))
            .collect()
    }

    /// Validate the shared password presented by a peer or proxied request.
    pub async fn check_password(&self, password: &str) -> bool {
        match self.db.settings().get().await {
            Ok(settings) => {
                !settings.nakama.host_password.is_empty()
                    && settings.nakama.host_password == password
            }
            Err(_) => false,
        }
    }

    /// Drive one peer socket to completion.
    pub async fn handle_socket(&self, socket: WebSocket) {
        let (mut write, mut read) = socket.split();

        // Handshake: the first message must be a valid auth envelope.
        let auth = tokio::time::timeout(Duration::from_secs(10), read.next()).await;
        let envelope = match auth {
            Ok(Some(Ok(Message::Text(text)))) => Envelope::parse(&text),
            _ => None,
        };
        let Some(envelope) = envelope.filter(|e| e.kind == MessageType::Auth) else {
            let _ = write
                .send(Message::Text(
                    Envelope::error("expected auth", None).to_text().into(),
                ))
                .await;
            return;
        };
        let password = envelope.payload["password"].as_str().unwrap_or_default();
        if !self.check_password(password).await {
            tracing::warn!("Peer rejected: bad password");
            let _ = write
                .send(Message::Text(
                    Envelope::error("UNAUTHENTICATED", envelope.request_id.clone())
                        .to_text()
                        .into(),
                ))
                .await;
            return;
        }

        let peer_id = envelope.payload["peerId"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let username = envelope.payload["username"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("Peer_{}", &peer_id[..8.min(peer_id.len())]));

        let (tx, mut rx) = mpsc::channel::<Envelope>(PEER_QUEUE_SIZE);
        let reply = Envelope::new(
            MessageType::AuthReply,
            serde_json::json!({ "ok": true, "peerId": peer_id }),
        )
        .with_request_id(envelope.request_id.clone());
        let _ = tx.send(reply).await;

        self.peers.write().insert(
            peer_id.clone(),
            PeerHandle {
                peer_id: peer_id.clone(),
                username: username.clone(),
                tx: tx.clone(),
                last_pong: Instant::now(),
            },
        );
        self.events.send(WsEvent::NakamaPeerConnected {
            peer_id: peer_id.clone(),
            username: username.clone(),
        });
        tracing::info!(peer_id = %peer_id, username = %username, "Peer connected");

        // Writer task: drains the bounded queue in FIFO order.
        let writer = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if write
                    .send(Message::Text(envelope.to_text().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        // Reader loop.
        while let Some(message) = read.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) | Err(_) => break,
                _ => continue,
            };
            let Some(envelope) = Envelope::parse(&text) else {
                continue;
            };
            self.route(&peer_id, &username, envelope).await;
        }

        writer.abort();
        self.remove_peer(&peer_id);
    }

    fn remove_peer(&self, peer_id: &str) {
        if self.peers.write().remove(peer_id).is_some() {
            self.watch_party.leave(peer_id);
            self.events.send(WsEvent::NakamaPeerDisconnected {
                peer_id: peer_id.to_string(),
            });
            tracing::info!(peer_id = peer_id, "Peer disconnected");
        }
    }

    /// Queue a message for one peer; a full queue drops the peer.
    pub fn send_to(&self, peer_id: &str, envelope: Envelope) {
        let overflowed = {
            let peers = self.peers.read();
            match peers.get(peer_id) {
                Some(peer) => peer.tx.try_send(envelope).is_err(),
                None => false,
            }
        };
        if overflowed {
            tracing::warn!(peer_id = peer_id, "Peer queue overflow, dropping peer");
            self.remove_peer(peer_id);
        }
    }

    /// Broadcast to every connected peer.
    pub fn broadcast(&self, envelope: Envelope) {
        let ids: Vec<String> = self.peers.read().keys().cloned().collect();
        for id in ids {
            self.send_to(&id, envelope.clone());
        }
    }

    async fn route(&self, peer_id: &str, username: &str, envelope: Envelope) {
        let request_id = envelope.request_id.clone();
        match envelope.kind {
            MessageType::Ping => {
                self.send_to(
                    peer_id,
                    Envelope::new(MessageType::Pong, serde_json::Value::Null)
                        .with_request_id(request_id),
                );
            }
            MessageType::Pong => {
                if let Some(peer) = self.peers.write().get_mut(peer_id) {
                    peer.last_pong = Instant::now();
                }
            }
            MessageType::LibraryRequest => {
                let payload = self.library_snapshot().await;
                self.send_to(
                    peer_id,
                    Envelope::new(MessageType::LibraryResponse, payload)
                        .with_request_id(request_id),
                );
            }
            MessageType::MediaFilesRequest => {
                let media_id = envelope.payload["mediaId"].as_i64().unwrap_or(0);
                let payload = self.media_files(media_id).await;
                self.send_to(
                    peer_id,
                    Envelope::new(MessageType::MediaFilesResponse, payload)
                        .with_request_id(request_id),
                );
            }
            MessageType::StreamPlayRequest => {
                // The actual bytes flow over the authenticated HTTP stream
                // endpoint; the reply carries the proxied URL.
                let path = envelope.payload["path"].as_str().unwrap_or_default();
                let url = format!(
                    "/api/v1/nakama/stream?path={}",
                    urlencoding::encode(path)
                );
                self.send_to(
                    peer_id,
                    Envelope::new(
                        MessageType::StreamPlayResponse,
                        serde_json::json!({ "url": url }),
                    )
                    .with_request_id(request_id),
                );
            }
            MessageType::WatchPartyJoin => {
                let joined = self.watch_party.join(peer_id, username);
                match joined {
                    Some(session) => {
                        self.broadcast(Envelope::new(
                            MessageType::WatchPartyState,
                            serde_json::to_value(&session).unwrap_or_default(),
                        ));
                    }
                    None => self.send_to(
                        peer_id,
                        Envelope::error("no watch party", request_id),
                    ),
                }
            }
            MessageType::WatchPartyLeave => {
                self.watch_party.leave(peer_id);
                if let Some(session) = self.watch_party.session() {
                    self.broadcast(Envelope::new(
                        MessageType::WatchPartyState,
                        serde_json::to_value(&session).unwrap_or_default(),
                    ));
                }
            }
            MessageType::WatchPartyPlaybackStatus => {
                // Peers report buffering readiness through their status.
                let ready = envelope.payload["ready"].as_bool().unwrap_or(true);
                self.watch_party.set_ready(peer_id, ready);
            }
            MessageType::Custom => {
                self.events.send(WsEvent::Notification {
                    level: "info".to_string(),
                    message: format!("Peer message from {username}"),
                });
            }
            _ => {
                tracing::debug!(kind = ?envelope.kind, "Unroutable peer message");
            }
        }
    }

    /// The host's library collection snapshot, filtered by the unshared set.
    async fn library_snapshot(&self) -> serde_json::Value {
        let unshared = self
            .db
            .settings()
            .get()
            .await
            .map(|s| s.nakama.unshared_media_ids)
            .unwrap_or_default();
        let files = self.store.get();
        let collection = self
            .platform
            .anime_collection(false)
            .await
            .unwrap_or_default();
        let entries: Vec<_> = build_entries(&files, &collection)
            .into_iter()
            .filter(|e| !unshared.contains(&e.media_id))
            .collect();
        serde_json::to_value(&entries).unwrap_or_default()
    }

    async fn media_files(&self, media_id: i64) -> serde_json::Value {
        let unshared = self
            .db
            .settings()
            .get()
            .await
            .map(|s| s.nakama.unshared_media_ids)
            .unwrap_or_default();
        if unshared.contains(&media_id) {
            return serde_json::json!([]);
        }
        let files = self.store.get();
        let paths: Vec<serde_json::Value> = files
            .iter()
            .filter(|lf| lf.media_id == media_id && !lf.ignored)
            .map(|lf| {
                serde_json::json!({
                    "path": lf.path,
                    "name": lf.name,
                    "episode": lf.metadata.episode,
                })
            })
            .collect();
        serde_json::Value::Array(paths)
    }

    /// Ping loop: stale peers (no pong within the deadline) are removed.
    fn spawn_ping_loop(&self) {
        let host = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PING_INTERVAL);
            loop {
                interval.tick().await;
                let stale: Vec<String> = {
                    let peers = host.peers.read();
                    peers
                        .values()
                        .filter(|p| p.last_pong.elapsed() > PONG_DEADLINE)
                        .map(|p| p.peer_id.clone())
                        .collect()
                };
                for peer_id in stale {
                    tracing::warn!(peer_id = %peer_id, "Peer stale, removing");
                    host.remove_peer(&peer_id);
                }
                host.broadcast(Envelope::new(MessageType::Ping, serde_json::Value::Null));
            }
        });
    }

    /// Host-side watch party creation (host-only operation).
    pub async fn create_watch_party(&self, settings: WatchPartySettings) -> serde_json::Value {
        let username = self
            .db
            .settings()
            .get()
            .await
            .map(|s| {
                if s.nakama.username.is_empty() {
                    "host".to_string()
                } else {
                    s.nakama.username
                }
            })
            .unwrap_or_else(|_| "host".to_string());
        let session = self.watch_party.create(&username, settings);
        let payload = serde_json::to_value(&session).unwrap_or_default();
        self.broadcast(Envelope::new(MessageType::WatchPartyCreated, payload.clone()));
        payload
    }

    /// Relay a host playback status; seeks go out as their own event.
    pub fn relay_playback(&self, position: f64, paused: bool, seek: bool) {
        let payload = serde_json::json!({ "position": position, "paused": paused });
        if seek {
            self.broadcast(Envelope::new(MessageType::WatchPartySeek, payload));
        } else {
            self.broadcast(Envelope::new(MessageType::WatchPartyPlaybackStatus, payload));
        }
    }
}
