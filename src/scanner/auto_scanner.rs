//! Auto-scanner
//!
//! Debounced scan trigger driven by acquisition events and filesystem
//! watchers. A notification opens a debounce window; further notifications
//! reset it; when the window closes a scan runs. Notifications arriving
//! during a scan coalesce into a single missed flag that opens one more
//! window after the scan ends.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::db::Database;

use super::Scanner;

const DEBOUNCE_WINDOW: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct AutoScanner {
    tx: mpsc::Sender<Trigger>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// Debounced notification, honours the enabled flag
    Notify,
    /// Immediate scan, ignores the enabled flag
    Force,
}

impl AutoScanner {
    pub fn start(scanner: Scanner, db: Database) -> Self {
        Self::start_with_window(scanner, db, DEBOUNCE_WINDOW)
    }

    fn start_with_window(scanner: Scanner, db: Database, window: Duration) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run_loop(scanner, db, rx, window));
        Self { tx }
    }

    /// Signal that the filesystem (or download queue) changed.
    pub fn notify(&self) {
        let _ = self.tx.try_send(Trigger::Notify);
    }

    /// Request an immediate scan, ignoring the enabled flag.
    pub fn force(&self) {
        let _ = self.tx.try_send(Trigger::Force);
    }
}

async fn run_loop(
    scanner: Scanner,
    db: Database,
    mut rx: mpsc::Receiver<Trigger>,
    window: Duration,
) {
    loop {
        let Some(first) = rx.recv().await else {
            return; // channel closed, shut down
        };

        let mut force = first == Trigger::Force;
        if !force {
            // Debounce: each further notification restarts the window.
            loop {
                tokio::select! {
                    trigger = rx.recv() => match trigger {
                        Some(Trigger::Force) => {
                            force = true;
                            break;
                        }
                        Some(Trigger::Notify) => continue,
                        None => return,
                    },
                    _ = tokio::time::sleep(window) => break,
                }
            }
        }

        if !force {
            let enabled = db
                .settings()
                .get()
                .await
                .map(|s| s.auto_scan_enabled)
                .unwrap_or(false);
            if !enabled {
                continue;
            }
        }

        // Drain anything queued before scanning; notifications arriving
        // mid-scan set the missed flag through the channel buffer.
        while rx.try_recv().is_ok() {}

        run_scan(&scanner).await;

        // Coalesce notifications received during the scan into one more
        // window.
        let mut missed = false;
        while let Ok(t) = rx.try_recv() {
            missed = true;
            if t == Trigger::Force {
                break;
            }
        }
        if missed {
            tokio::time::sleep(window).await;
            while rx.try_recv().is_ok() {}
            run_scan(&scanner).await;
        }
    }
}

async fn run_scan(scanner: &Scanner) {
    let (roots, opts) = match scanner.options_from_settings().await {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "Auto-scan aborted, could not load settings");
            return;
        }
    };
    if roots.is_empty() {
        tracing::debug!("Auto-scan skipped, no library paths configured");
        return;
    }
    if let Err(e) = scanner.scan(&roots, &opts).await {
        tracing::error!(error = %e, "Auto-scan failed");
    }
}

/// Arc alias used by components that hold the trigger handle.
pub type SharedAutoScanner = Arc<AutoScanner>;
