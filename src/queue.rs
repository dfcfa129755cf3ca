//! In-process job queue with a fixed worker pool.
//!
//! At most one job per user runs at a time. A job for a busy user is parked
//! and coalesced with any other parked job for that user, then re-dispatched
//! once the running one finishes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use calmesh_core::store::{JobQueue, SyncJob, SyncTrigger, UserId};
use calmesh_core::{CalMeshError, CalMeshResult};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Runs dequeued jobs.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &SyncJob, queue: &dyn JobQueue) -> CalMeshResult<()>;
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone)]
struct Envelope {
    job: SyncJob,
    attempt: u32,
}

struct Shared {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    handler: Arc<dyn JobHandler>,
    settings: QueueSettings,
    running: Mutex<HashSet<UserId>>,
    parked: Mutex<HashMap<UserId, Envelope>>,
}

#[derive(Clone)]
pub struct LocalQueue {
    shared: Arc<Shared>,
}

impl LocalQueue {
    /// Spawn `settings.workers` worker tasks on the current runtime.
    pub fn start(handler: Arc<dyn JobHandler>, settings: QueueSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let workers = settings.workers.max(1);

        let queue = LocalQueue {
            shared: Arc::new(Shared {
                tx,
                rx: Mutex::new(rx),
                handler,
                settings,
                running: Mutex::new(HashSet::new()),
                parked: Mutex::new(HashMap::new()),
            }),
        };

        for worker in 0..workers {
            let queue = queue.clone();
            tokio::spawn(async move { queue.work(worker).await });
        }
        info!(workers, "job queue started");

        queue
    }

    fn send(&self, envelope: Envelope) -> CalMeshResult<()> {
        self.shared
            .tx
            .send(envelope)
            .map_err(|_| CalMeshError::Store("job queue is closed".into()))
    }

    async fn work(&self, worker: usize) {
        loop {
            let next = self.shared.rx.lock().await.recv().await;
            let Some(envelope) = next else {
                debug!(worker, "job queue closed, worker exiting");
                return;
            };
            self.process(envelope).await;
        }
    }

    async fn process(&self, envelope: Envelope) {
        let user_id = match &envelope.job {
            SyncJob::User { user_id, .. } => Some(user_id.clone()),
            SyncJob::FanOut => None,
        };

        if let Some(user_id) = &user_id {
            let mut running = self.shared.running.lock().await;
            if running.contains(user_id) {
                debug!(user_id = %user_id, "user job already running, parking");
                let mut parked = self.shared.parked.lock().await;
                let merged = match parked.remove(user_id) {
                    Some(existing) => coalesce(existing, envelope),
                    None => envelope,
                };
                parked.insert(user_id.clone(), merged);
                return;
            }
            running.insert(user_id.clone());
        }

        // A panicking handler must not leave the user marked as running
        let handler = Arc::clone(&self.shared.handler);
        let job = envelope.job.clone();
        let queue = self.clone();
        let result = tokio::spawn(async move { handler.handle(&job, &queue).await })
            .await
            .unwrap_or_else(|e| Err(CalMeshError::JobAborted(e.to_string())));

        if let Err(e) = result {
            self.retry_later(envelope, e);
        }

        if let Some(user_id) = &user_id {
            self.shared.running.lock().await.remove(user_id);
            let parked = self.shared.parked.lock().await.remove(user_id);
            if let Some(Err(e)) = parked.map(|envelope| self.send(envelope)) {
                error!(user_id = %user_id, "failed to re-dispatch parked job: {e}");
            }
        }
    }

    fn retry_later(&self, envelope: Envelope, e: CalMeshError) {
        let attempt = envelope.attempt + 1;
        if attempt >= self.shared.settings.max_attempts {
            error!(job = ?envelope.job, attempts = attempt, "job failed, giving up: {e}");
            return;
        }

        let delay = backoff(self.shared.settings.retry_backoff, envelope.attempt);
        warn!(job = ?envelope.job, attempt, "job failed, retrying in {delay:?}: {e}");

        let queue = self.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            if let Err(e) = queue.send(Envelope {
                job: envelope.job,
                attempt,
            }) {
                error!("failed to re-enqueue job: {e}");
            }
        });
    }
}

/// `base · 2^attempt`
fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Two parked jobs for one user collapse into one. A manual trigger wins over
/// an automatic one, and the lower attempt count is kept.
fn coalesce(existing: Envelope, incoming: Envelope) -> Envelope {
    let manual = |e: &Envelope| matches!(e.job, SyncJob::User { trigger: SyncTrigger::Manual, .. });
    if manual(&existing) && !manual(&incoming) {
        Envelope {
            attempt: incoming.attempt.min(existing.attempt),
            ..existing
        }
    } else {
        Envelope {
            attempt: incoming.attempt.min(existing.attempt),
            ..incoming
        }
    }
}

#[async_trait]
impl JobQueue for LocalQueue {
    async fn enqueue(&self, job: SyncJob) -> CalMeshResult<()> {
        self.send(Envelope { job, attempt: 0 })
    }

    async fn register_repeat(&self, job: SyncJob, every: Duration) -> CalMeshResult<()> {
        let queue = self.clone();
        info!(job = ?job, "repeating every {every:?}");

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                debug!(job = ?job, "scheduler tick");
                if let Err(e) = queue.enqueue(job.clone()).await {
                    error!("scheduler stopped: {e}");
                    return;
                }
            }
        });

        Ok(())
    }
}
