//! Background job scheduling
//!
//! The auto-downloader runs on its own settings-driven ticker; the cron
//! scheduler covers the fixed-cadence maintenance jobs: queue purge,
//! transcode GC and file cache GC.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::app::AppState;
use crate::autodownloader::AutoDownloader;

/// Initialize and start the job scheduler.
pub async fn start_scheduler(state: AppState) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Auto-downloader queue purge - daily at 4 AM
    let auto_downloader = state.auto_downloader.clone();
    let purge_job = Job::new_async("0 0 4 * * *", move |_uuid, _l| {
        let auto_downloader = auto_downloader.clone();
        Box::pin(async move {
            if let Err(e) = auto_downloader.purge_stale_items().await {
                tracing::error!("Queue purge error: {}", e);
            }
        })
    })?;
    scheduler.add(purge_job).await?;

    // Transcode GC - every 10 minutes: idle sessions + disk budget
    let gc_state = state.clone();
    let transcode_gc = Job::new_async("0 */10 * * * *", move |_uuid, _l| {
        let state = gc_state.clone();
        Box::pin(async move {
            state.transcoder.reap_idle_sessions();
            let budget = state
                .db
                .settings()
                .get()
                .await
                .map(|s| s.media_stream.transcode_disk_budget_mib * 1024 * 1024)
                .unwrap_or(10 * 1024 * 1024 * 1024);
            state.transcoder.enforce_disk_budget(budget).await;
        })
    })?;
    scheduler.add(transcode_gc).await?;

    // File cache GC - hourly
    let cache = state.cache.clone();
    let cache_gc = Job::new_async("0 30 * * * *", move |_uuid, _l| {
        let cache = cache.clone();
        Box::pin(async move {
            cache.gc();
        })
    })?;
    scheduler.add(cache_gc).await?;

    scheduler.start().await?;
    info!("Job scheduler started");
    Ok(scheduler)
}

/// Settings-driven auto-downloader ticker: re-reads the interval every
/// cycle (minimum 15 minutes) so changes apply without a restart.
pub fn start_auto_downloader_loop(auto_downloader: Arc<AutoDownloader>, db: crate::db::Database) {
    tokio::spawn(async move {
        loop {
            let minutes = db
                .settings()
                .get()
                .await
                .map(|s| s.auto_downloader.interval.max(15))
                .unwrap_or(20);
            tokio::time::sleep(std::time::Duration::from_secs(minutes * 60)).await;
            if let Err(e) = auto_downloader.run().await {
                tracing::error!("Auto-downloader error: {}", e);
            }
        }
    });
}
