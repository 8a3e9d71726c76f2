//! Rows of the `workers` (lease) table.

use livenb_core::lease::Lease;
use livenb_core::types::{DbId, Timestamp};
use livenb_core::worker_state::{StatusId, WorkerState};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Worker {
    pub id: DbId,
    pub session_id: String,
    pub notebook_id: DbId,
    pub machine_id: String,
    pub state: StatusId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Worker {
    /// Convert to the domain record. Unrecognised ids map to `Unknown`.
    pub fn into_lease(self) -> Lease {
        let state = WorkerState::from_id(self.state).unwrap_or_else(|| {
            tracing::warn!(worker_id = self.id, state = self.state, "Unrecognised worker state id");
            WorkerState::Unknown
        });
        Lease {
            id: self.id,
            session_id: self.session_id,
            notebook_id: self.notebook_id,
            machine_id: self.machine_id,
            state,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
