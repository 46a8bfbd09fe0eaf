//! Kanata - self-hosted anime media orchestration server
//!
//! Unifies the local library (scan, match, play), remote acquisition
//! (provider feeds, auto-downloading, torrents, debrid, streaming) and a
//! user-extensible provider layer behind one HTTP + WebSocket API.

mod api;
mod app;
mod autodownloader;
mod cache;
mod config;
mod db;
mod debrid;
mod events;
mod extensions;
mod jobs;
mod library;
mod metadata;
mod nakama;
mod parser;
mod platform;
mod playback;
mod scanner;
mod stream;
mod torrent;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::app::AppState;
use crate::autodownloader::AutoDownloader;
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
use crate::torrent::client::{RqbitClient, RqbitClientConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env()?);
    config.ensure_dirs()?;

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "kanata.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kanata=debug,tower_http=info,librqbit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Kanata");

    let db = Database::connect(&config.database_path).await?;
    tracing::info!("Database connected");

    let events = EventBus::new();
    let cache = FileCacher::new(config.cache_dir.clone())?;
    let vault = Arc::new(CredentialVault::new(&config.data_dir));

    let platform = Platform::new(db.clone(), cache.clone());
    let metadata = MetadataService::new(cache.clone(), platform.clone());
    let store = LibraryStore::load(db.clone()).await?;
    let continuity = ContinuityStore::new(cache.clone());

    let scanner = Scanner::new(
        db.clone(),
        store.clone(),
        platform.clone(),
        metadata.clone(),
        events.clone(),
    );
    let auto_scanner = AutoScanner::start(scanner.clone(), db.clone());

    let settings = db.settings().get().await?;
    let torrent_config = RqbitClientConfig {
        download_dir: if settings.torrent_client.download_dir.is_empty() {
            config.data_dir.join("downloads")
        } else {
            settings.torrent_client.download_dir.clone().into()
        },
        session_dir: config.data_dir.join("session"),
        enable_dht: settings.torrent_client.enable_dht,
        listen_port: settings.torrent_client.listen_port,
    };
    let torrent_client = Arc::new(RqbitClient::new(torrent_config, events.clone()).await?);
    tracing::info!("Torrent client initialized");

    let extensions = ExtensionRegistry::new(db.clone(), events.clone());
    if let Err(e) = extensions.load_all().await {
        tracing::warn!(error = %e, "Some extensions failed to load");
    }

    let torrent_streamer = Arc::new(TorrentStreamer::new(
        config.torrent_stream_dir.clone(),
        events.clone(),
    ));
    let transcoder = Arc::new(Transcoder::new(
        config.transcode_dir.clone(),
        config.ffmpeg_path.clone(),
        config.ffprobe_path.clone(),
        cache.clone(),
        events.clone(),
    ));
    let direct = DirectStreamer::new();

    let playback = PlaybackManager::new(
        db.clone(),
        platform.clone(),
        continuity.clone(),
        events.clone(),
    );

    let auto_downloader = Arc::new(AutoDownloader::new(
        db.clone(),
        events.clone(),
        platform.clone(),
        metadata.clone(),
        extensions.clone(),
        store.clone(),
        torrent_client.clone(),
        auto_scanner.clone(),
        vault.clone(),
    ));

    let nakama = NakamaManager::new(
        db.clone(),
        events.clone(),
        store.clone(),
        platform.clone(),
    );
    nakama.autostart().await;

    let state = AppState {
        config: config.clone(),
        db: db.clone(),
        events,
        cache,
        platform,
        metadata,
        store,
        continuity,
        scanner,
        auto_scanner,
        auto_downloader: auto_downloader.clone(),
        torrent_client,
        torrent_streamer,
        transcoder: transcoder.clone(),
        direct,
        extensions,
        playback,
        nakama,
        vault,
    };

    let _scheduler = jobs::start_scheduler(state.clone()).await?;
    jobs::start_auto_downloader_loop(auto_downloader, db);

    let router = app::build_app(state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    transcoder.shutdown().await;
    Ok(())
}
