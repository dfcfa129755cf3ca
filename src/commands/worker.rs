use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use calmesh_core::store::{JobQueue, SyncJob};
use tracing::info;

use super::App;
use crate::queue::{LocalQueue, QueueSettings};

pub async fn run(app: App) -> Result<()> {
    let settings = &app.config.sync;
    let every = Duration::from_secs(settings.interval_minutes.max(1) * 60);

    let queue = LocalQueue::start(
        Arc::new(app.sync_service()?),
        QueueSettings {
            workers: settings.workers,
            max_attempts: settings.max_attempts,
            retry_backoff: Duration::from_secs(settings.retry_backoff_secs),
        },
    );

    // First pass right away, then on the interval
    queue.enqueue(SyncJob::FanOut).await?;
    queue.register_repeat(SyncJob::FanOut, every).await?;

    println!(
        "Worker running (store: {}). Syncing every {} minutes. Press Ctrl-C to stop.",
        app.store.path().display(),
        settings.interval_minutes
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutting down");

    Ok(())
}
