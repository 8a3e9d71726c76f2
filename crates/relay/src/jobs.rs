//! In-process job scheduling.
//!
//! Jobs are a closed set. [`TokioScheduler`] queues them on an unbounded
//! channel (optionally after a delay) and [`JobRunner`] drains the channel,
//! running each job on its own task.

use std::sync::Arc;
use std::time::Duration;

use livenb_core::storage::ArtifactStorage;
use livenb_core::types::DbId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::spawner::{SpawnOutcome, WorkerSpawner};

/// Everything a worker process needs to find its lease and the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub notebook_id: DbId,
    pub session_id: String,
    /// Id of the Queued lease the process will claim.
    pub worker_id: DbId,
    /// Relay address the process connects back to.
    pub callback_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    SpawnWorker(SpawnRequest),
    /// Delete the artifacts of sessions whose leases were swept.
    CleanupSessions(Vec<String>),
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::SpawnWorker(_) => "spawn-worker",
            Job::CleanupSessions(_) => "cleanup-sessions",
        }
    }
}

/// Accepts jobs for asynchronous execution. Submission never blocks.
pub trait JobScheduler: Send + Sync {
    fn submit(&self, job: Job);

    fn submit_delayed(&self, job: Job, delay: Duration);
}

// ---------------------------------------------------------------------------
// Tokio scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<Job>,
}

impl TokioScheduler {
    /// Create a scheduler and the receiver its jobs arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl JobScheduler for TokioScheduler {
    fn submit(&self, job: Job) {
        let name = job.name();
        if self.tx.send(job).is_err() {
            tracing::warn!(job = name, "Job runner stopped; dropping job");
        }
    }

    fn submit_delayed(&self, job: Job, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let name = job.name();
            if tx.send(job).is_err() {
                tracing::warn!(job = name, "Job runner stopped; dropping delayed job");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct JobRunner {
    spawner: WorkerSpawner,
    storage: Arc<dyn ArtifactStorage>,
}

impl JobRunner {
    pub fn new(spawner: WorkerSpawner, storage: Arc<dyn ArtifactStorage>) -> Self {
        Self { spawner, storage }
    }

    /// Drain `rx` until it closes or `cancel` fires.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<Job>, cancel: CancellationToken) {
        let runner = Arc::new(self);
        tracing::info!("Job runner started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job runner stopping");
                    break;
                }
                job = rx.recv() => {
                    let Some(job) = job else {
                        tracing::info!("Job queue closed; runner stopping");
                        break;
                    };
                    let runner = Arc::clone(&runner);
                    tokio::spawn(async move { runner.execute(job).await });
                }
            }
        }
    }

    /// Run a single job to completion. Failures are logged.
    pub async fn execute(&self, job: Job) {
        match job {
            Job::SpawnWorker(request) => match self.spawner.spawn(request).await {
                Ok(SpawnOutcome::Started { pid }) => {
                    tracing::debug!(pid, "Spawn job finished");
                }
                Ok(SpawnOutcome::Deferred { running }) => {
                    tracing::debug!(running, "Spawn job deferred");
                }
                Err(e) => tracing::error!(error = %e, "Spawn job failed"),
            },
            Job::CleanupSessions(sessions) => {
                for session_id in sessions {
                    if let Err(e) = self.storage.delete_session(&session_id).await {
                        tracing::warn!(session_id = %session_id, error = %e, "Session cleanup failed");
                    }
                }
            }
        }
    }
}
