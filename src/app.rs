//! Application state and HTTP router construction.

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::FileCacher;
use crate::config::Config;
use crate::db::Database;
use crate::debrid::CredentialVault;
use crate::events::EventBus;
use crate::extensions::ExtensionRegistry;
use crate::library::{ContinuityStore, LibraryStore};
use crate::metadata::MetadataService;
use crate::nakama::NakamaManager;
use crate::platform::Platform;
use crate::playback::PlaybackManager;
use crate::scanner::Scanner;
use crate::scanner::auto_scanner::AutoScanner;
use crate::stream::{DirectStreamer, TorrentStreamer, Transcoder};
use crate::torrent::RqbitClient;
use crate::autodownloader::AutoDownloader;

/// Shared state for every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub events: EventBus,
    pub cache: FileCacher,
    pub platform: Platform,
    pub metadata: MetadataService,
    pub store: LibraryStore,
    pub continuity: ContinuityStore,
    pub scanner: Scanner,
    pub auto_scanner: AutoScanner,
    pub auto_downloader: Arc<AutoDownloader>,
    pub torrent_client: Arc<RqbitClient>,
    pub torrent_streamer: Arc<TorrentStreamer>,
    pub transcoder: Arc<Transcoder>,
    pub direct: DirectStreamer,
    pub extensions: ExtensionRegistry,
    pub playback: PlaybackManager,
    pub nakama: NakamaManager,
    pub vault: Arc<CredentialVault>,
}

/// Build the full router: the versioned API tree, CORS and tracing layers.
pub fn build_app(state: AppState) -> Router<()> {
    let api = crate::api::router(state.clone());
    Router::new()
        .nest("/api/v1", api)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
