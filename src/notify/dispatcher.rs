//! Bounded notification queue drained by a worker pool
//!
//! Same shape as a broadcast worker pool: one bounded channel, N workers
//! sharing the receiver. Enqueue uses `try_send`, so a full queue rejects the
//! new job instead of stalling the caller.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, Mutex};

use crate::core::UserId;
use crate::notify::provider::PushProvider;

/// One push notification for one user
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationJob {
    pub target_user: UserId,
    pub title: String,
    pub body: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
}

/// Counters snapshot
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub enqueued: u64,
    /// Rejected because the queue was full or shut down
    pub rejected: u64,
    pub sent: u64,
    /// Dropped after exhausting all attempts
    pub failed: u64,
}

pub struct NotificationDispatcher {
    sender: mpsc::Sender<NotificationJob>,
    counters: Arc<Counters>,
}

impl NotificationDispatcher {
    /// Spawn `workers` tasks on the current tokio runtime
    pub fn new(
        provider: Arc<dyn PushProvider>,
        capacity: usize,
        workers: usize,
        attempts: u32,
        backoff: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        for worker_id in 0..workers.max(1) {
            let worker = Worker {
                id: worker_id,
                rx: rx.clone(),
                provider: provider.clone(),
                counters: counters.clone(),
                attempts: attempts.max(1),
                backoff,
            };
            tokio::spawn(worker.run());
        }

        Self { sender: tx, counters }
    }

    /// Queue a job without waiting. Returns false if it was rejected.
    pub fn enqueue(&self, job: NotificationJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!("Notification queue full, dropping notification for {}", job.target_user);
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!("Notification workers gone, dropping notification for {}", job.target_user);
                false
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            sent: self.counters.sent.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

struct Worker {
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<NotificationJob>>>,
    provider: Arc<dyn PushProvider>,
    counters: Arc<Counters>,
    attempts: u32,
    backoff: Duration,
}

impl Worker {
    async fn run(self) {
        loop {
            let job = {
                let mut receiver = self.rx.lock().await;
                receiver.recv().await
            };

            match job {
                Some(job) => self.deliver(job).await,
                None => {
                    info!("Notification worker {} shutting down", self.id);
                    break;
                }
            }
        }
    }

    async fn deliver(&self, job: NotificationJob) {
        for attempt in 1..=self.attempts {
            match self.provider.send(&job).await {
                Ok(()) => {
                    self.counters.sent.fetch_add(1, Ordering::Relaxed);
                    debug!("Worker {} pushed notification to {}", self.id, job.target_user);
                    return;
                }
                Err(e) if attempt < self.attempts => {
                    debug!(
                        "Push to {} failed (attempt {}/{}): {}",
                        job.target_user, attempt, self.attempts, e
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Dropping notification for {} after {} attempts: {}",
                        job.target_user, self.attempts, e
                    );
                }
            }
        }
    }
}
