/// Background cleanup of inactive session projections
///
/// A single long-lived tokio task sweeps the hot store every
/// interval_minutes and prunes sessions idle past the inactivity threshold.
/// Sleep is decomposed into 1-second ticks so shutdown stays responsive.
/// Durable session rows are never touched — only the hot projection is
/// pruned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::store::HotStore;

pub struct CleanupScheduler {
    hot: Arc<dyn HotStore>,
    interval_seconds: u64,
    inactivity_threshold_minutes: i64,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupScheduler {
    pub fn new(
        hot: Arc<dyn HotStore>,
        interval_minutes: u64,
        inactivity_threshold_minutes: i64,
    ) -> Self {
        CleanupScheduler {
            hot,
            interval_seconds: interval_minutes * 60,
            inactivity_threshold_minutes,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Start the background sweep. Idempotent — a second call while the task
    /// is running is a no-op.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Cleanup scheduler already running");
            return;
        }

        let hot = Arc::clone(&self.hot);
        let running = Arc::clone(&self.running);
        let interval_seconds = self.interval_seconds;
        let threshold = self.inactivity_threshold_minutes;

        let task = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tracing::info!("Running scheduled session cleanup");
                match hot.cleanup_inactive_sessions(threshold).await {
                    Ok(count) => {
                        tracing::info!(removed = count, "Scheduled cleanup completed");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Scheduled cleanup failed");
                    }
                }

                // 1-second ticks so stop() takes effect quickly
                for _ in 0..interval_seconds {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });

        *self.handle.lock().await = Some(task);
        tracing::info!(
            interval_seconds,
            threshold_minutes = threshold,
            "Session cleanup scheduler started"
        );
    }

    /// Signal the task to stop and wait up to 5 seconds for it to exit.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(task) = self.handle.lock().await.take() {
            if tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .is_err()
            {
                tracing::warn!("Cleanup scheduler did not stop within 5s");
            }
        }

        tracing::info!("Session cleanup scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
