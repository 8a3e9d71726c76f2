//! Worker lease records and the lock-free lease protocol.
//!
//! A lease is the claim of one worker process on one (notebook, session).
//! Nothing serializes lease writes; instead three convergence rules keep
//! the set of leases bounded:
//!
//! - a freshly connected worker deletes older siblings for its session
//!   ([`evict_older_siblings`]);
//! - every client ping sweeps stale leases system-wide ([`sweep_stale`]);
//! - a worker whose own lease went stale deletes it and exits
//!   ([`Lease::is_stale`]).
//!
//! Duplicates are therefore transient, and an abandoned lease survives at
//! most one staleness window past the next ping anywhere in the system.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::store::LeaseStore;
use crate::types::{DbId, Timestamp};
use crate::worker_state::{WorkerState, ACTIVE_STATES};

/// Default staleness threshold in minutes.
pub const DEFAULT_STALE_MINUTES: i64 = 2;

/// This host's name, used as the default `machine_id`.
///
/// Reads `HOSTNAME`, then `/etc/hostname`, falling back to `localhost`.
pub fn host_machine_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".into())
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub id: DbId,
    pub session_id: String,
    pub notebook_id: DbId,
    /// Host running the process; empty until the process claims the lease.
    pub machine_id: String,
    pub state: WorkerState,
    pub created_at: Timestamp,
    /// Touched on every write. This is the lease clock.
    pub updated_at: Timestamp,
}

impl Lease {
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Whether the lease has gone without a write for longer than `threshold`.
    pub fn is_stale(&self, now: Timestamp, threshold: chrono::Duration) -> bool {
        now - self.updated_at > threshold
    }
}

/// Conjunctive lease query. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeaseFilter {
    pub notebook_id: Option<DbId>,
    pub session_id: Option<String>,
    pub machine_id: Option<String>,
    pub states: Option<Vec<WorkerState>>,
    /// Only ids strictly below this one.
    pub id_below: Option<DbId>,
    /// Only leases whose `updated_at` is strictly earlier.
    pub updated_before: Option<Timestamp>,
}

impl LeaseFilter {
    /// All leases of one (notebook, session).
    pub fn session(notebook_id: DbId, session_id: impl Into<String>) -> Self {
        Self {
            notebook_id: Some(notebook_id),
            session_id: Some(session_id.into()),
            ..Default::default()
        }
    }

    /// All leases claimed by processes on `machine_id`.
    pub fn machine(machine_id: impl Into<String>) -> Self {
        Self {
            machine_id: Some(machine_id.into()),
            ..Default::default()
        }
    }

    pub fn in_states(mut self, states: &[WorkerState]) -> Self {
        self.states = Some(states.to_vec());
        self
    }

    pub fn active(self) -> Self {
        self.in_states(&ACTIVE_STATES)
    }

    pub fn older_than_id(mut self, id: DbId) -> Self {
        self.id_below = Some(id);
        self
    }

    pub fn updated_before(mut self, cutoff: Timestamp) -> Self {
        self.updated_before = Some(cutoff);
        self
    }

    /// Evaluate the filter against one record.
    pub fn matches(&self, lease: &Lease) -> bool {
        self.notebook_id.map_or(true, |id| lease.notebook_id == id)
            && self
                .session_id
                .as_deref()
                .map_or(true, |sid| lease.session_id == sid)
            && self
                .machine_id
                .as_deref()
                .map_or(true, |m| lease.machine_id == m)
            && self
                .states
                .as_deref()
                .map_or(true, |states| states.contains(&lease.state))
            && self.id_below.map_or(true, |id| lease.id < id)
            && self
                .updated_before
                .map_or(true, |cutoff| lease.updated_at < cutoff)
    }
}

/// Fields to change on a lease. Every update touches `updated_at`, so the
/// empty update is a heartbeat.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeaseUpdate {
    pub state: Option<WorkerState>,
    pub machine_id: Option<String>,
}

impl LeaseUpdate {
    pub fn touch() -> Self {
        Self::default()
    }

    pub fn state(state: WorkerState) -> Self {
        Self {
            state: Some(state),
            machine_id: None,
        }
    }

    /// Mark the lease as running on `machine_id`.
    pub fn claim(machine_id: impl Into<String>) -> Self {
        Self {
            state: Some(WorkerState::Running),
            machine_id: Some(machine_id.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Protocol rules
// ---------------------------------------------------------------------------

/// The live lease for a session, if any (newest first).
pub async fn find_active(
    store: &dyn LeaseStore,
    notebook_id: DbId,
    session_id: &str,
) -> Result<Option<Lease>, CoreError> {
    let mut leases = store
        .filter(&LeaseFilter::session(notebook_id, session_id).active())
        .await?;
    leases.sort_by_key(|l| std::cmp::Reverse(l.id));
    Ok(leases.into_iter().next())
}

/// Delete every lease of the same session with a smaller id than `own`.
///
/// Run by a worker right after it connects. After any crash-free period the
/// most recently created lease is the only survivor.
pub async fn evict_older_siblings(
    store: &dyn LeaseStore,
    own: &Lease,
) -> Result<Vec<Lease>, CoreError> {
    let filter = LeaseFilter::session(own.notebook_id, own.session_id.clone()).older_than_id(own.id);
    let evicted = store.delete_matching(&filter).await?;
    for lease in &evicted {
        tracing::info!(
            worker_id = own.id,
            evicted_id = lease.id,
            notebook_id = own.notebook_id,
            session_id = %own.session_id,
            "Evicted older sibling lease",
        );
    }
    Ok(evicted)
}

/// Delete, system-wide, every lease not written for longer than `threshold`.
pub async fn sweep_stale(
    store: &dyn LeaseStore,
    now: Timestamp,
    threshold: chrono::Duration,
) -> Result<Vec<Lease>, CoreError> {
    let filter = LeaseFilter::default().updated_before(now - threshold);
    store.delete_matching(&filter).await
}

/// Number of leases already claimed by processes on `machine_id`.
pub async fn count_on_machine(store: &dyn LeaseStore, machine_id: &str) -> Result<usize, CoreError> {
    Ok(store.filter(&LeaseFilter::machine(machine_id)).await?.len())
}
