//! Nakama peer hub
//!
//! Two asymmetric roles: the host accepts inbound peer sockets on the API
//! port; a peer opens one outbound socket to a configured host. Both sides
//! share the envelope vocabulary and the watch-party session model.

pub mod host;
pub mod message;
pub mod peer;
pub mod watch_party;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::db::Database;
use crate::events::EventBus;
use crate::library::LibraryStore;
use crate::platform::Platform;

pub use host::NakamaHost;
pub use message::{Envelope, MessageType};
pub use peer::{NakamaPeer, PeerConnectionState};
pub use watch_party::{WatchPartySettings, is_seek};

/// Owns both roles; the peer side is started lazily from settings.
#[derive(Clone)]
pub struct NakamaManager {
    pub host: NakamaHost,
    db: Database,
    events: EventBus,
    peer: Arc<RwLock<Option<NakamaPeer>>>,
}

impl NakamaManager {
    pub fn new(
        db: Database,
        events: EventBus,
        store: LibraryStore,
        platform: Platform,
    ) -> Self {
        Self {
            host: NakamaHost::new(db.clone(), events.clone(), store, platform),
            db,
            events,
            peer: Arc::new(RwLock::new(None)),
        }
    }

    pub fn peer(&self) -> Option<NakamaPeer> {
        self.peer.read().clone()
    }

    /// Connect (or reconnect) the outbound peer per current settings.
    pub async fn connect_peer(&self) -> anyhow::Result<()> {
        let settings = self.db.settings().get().await?;
        anyhow::ensure!(
            !settings.nakama.remote_url.is_empty(),
            "No nakama host URL configured"
        );
        let peer = NakamaPeer::start(
            settings.nakama.remote_url.clone(),
            settings.nakama.remote_password.clone(),
            settings.nakama.username.clone(),
            self.events.clone(),
        );
        *self.peer.write() = Some(peer);
        Ok(())
    }

    /// Start the peer side automatically when configured.
    pub async fn autostart(&self) {
        let Ok(settings) = self.db.settings().get().await else {
            return;
        };
        if !settings.nakama.remote_url.is_empty() {
            if let Err(e) = self.connect_peer().await {
                tracing::warn!(error = %e, "Nakama peer autostart failed");
            }
        }
    }
}
