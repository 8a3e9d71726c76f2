//! The worker's side of the lease protocol.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use livenb_core::lease::{evict_older_siblings, Lease, LeaseUpdate};
use livenb_core::store::LeaseStore;
use livenb_core::types::DbId;
use livenb_core::worker_state::WorkerState;

use crate::error::{WorkerError, WorkerResult};

/// Result of a staleness check on this process's own lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Not written for longer than the staleness threshold.
    Stale,
    /// Deleted by a sibling, a sweep, or an explicit close.
    Gone,
}

/// Handle on the lease this process was spawned for.
#[derive(Clone)]
pub struct WorkerLease {
    store: Arc<dyn LeaseStore>,
    id: DbId,
    notebook_id: DbId,
    session_id: String,
    machine_id: String,
    stale_after: chrono::Duration,
}

impl WorkerLease {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        id: DbId,
        notebook_id: DbId,
        session_id: impl Into<String>,
        machine_id: impl Into<String>,
        stale_after: chrono::Duration,
    ) -> Self {
        Self {
            store,
            id,
            notebook_id,
            session_id: session_id.into(),
            machine_id: machine_id.into(),
            stale_after,
        }
    }

    pub fn id(&self) -> DbId {
        self.id
    }

    /// Mark the lease Running on this host and evict older siblings.
    pub async fn claim(&self) -> WorkerResult<Lease> {
        if self
            .store
            .get(self.id, &self.session_id, self.notebook_id)
            .await?
            .is_none()
        {
            return Err(WorkerError::LeaseLost(self.id));
        }
        let lease = self
            .store
            .update(self.id, &LeaseUpdate::claim(&self.machine_id))
            .await?
            .ok_or(WorkerError::LeaseLost(self.id))?;
        let evicted = evict_older_siblings(self.store.as_ref(), &lease).await?;
        tracing::info!(
            worker_id = self.id,
            machine_id = %self.machine_id,
            evicted = evicted.len(),
            "Claimed worker lease",
        );
        Ok(lease)
    }

    /// Refresh `updated_at`.
    pub async fn touch(&self) -> WorkerResult<()> {
        self.store
            .update(self.id, &LeaseUpdate::touch())
            .await?
            .map(|_| ())
            .ok_or(WorkerError::LeaseLost(self.id))
    }

    pub async fn set_state(&self, state: WorkerState) -> WorkerResult<()> {
        self.store
            .update(self.id, &LeaseUpdate::state(state))
            .await?
            .map(|_| ())
            .ok_or(WorkerError::LeaseLost(self.id))
    }

    pub async fn check_fresh(&self) -> WorkerResult<Freshness> {
        let lease = self
            .store
            .get(self.id, &self.session_id, self.notebook_id)
            .await?;
        Ok(match lease {
            None => Freshness::Gone,
            Some(l) if l.is_stale(Utc::now(), self.stale_after) => Freshness::Stale,
            Some(_) => Freshness::Fresh,
        })
    }

    /// Delete the lease. Safe to call more than once.
    pub async fn release(&self) {
        match self.store.delete(self.id).await {
            Ok(true) => tracing::info!(worker_id = self.id, "Released worker lease"),
            Ok(false) => tracing::debug!(worker_id = self.id, "Lease already gone"),
            Err(e) => tracing::warn!(worker_id = self.id, error = %e, "Failed to release lease"),
        }
    }
}

/// Idle and total run-time limits.
#[derive(Debug, Clone)]
pub struct LifecycleLimits {
    max_idle: Option<Duration>,
    max_run: Option<Duration>,
    started: Instant,
    last_activity: Instant,
}

impl LifecycleLimits {
    pub fn new(max_idle: Option<Duration>, max_run: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            max_idle,
            max_run,
            started: now,
            last_activity: now,
        }
    }

    pub fn from_minutes(max_idle: Option<u64>, max_run: Option<u64>) -> Self {
        let minutes = |m: u64| Duration::from_secs(m * 60);
        Self::new(max_idle.map(minutes), max_run.map(minutes))
    }

    /// Record a notebook run.
    pub fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// The terminal state to report if a limit has been reached.
    pub fn exceeded(&self, now: Instant) -> Option<WorkerState> {
        if self
            .max_run
            .is_some_and(|max| now.saturating_duration_since(self.started) >= max)
        {
            return Some(WorkerState::MaxRunTimeReached);
        }
        if self
            .max_idle
            .is_some_and(|max| now.saturating_duration_since(self.last_activity) >= max)
        {
            return Some(WorkerState::MaxIdleTimeReached);
        }
        None
    }
}
