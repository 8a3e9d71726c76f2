//! Rows of the `worker_sessions` usage audit table.

use livenb_core::types::{DbId, Timestamp};
use livenb_core::worker_state::StatusId;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WorkerSession {
    pub id: DbId,
    pub ipv4: String,
    pub state: StatusId,
    pub owner_id: Option<DbId>,
    pub user_id: Option<DbId>,
    pub notebook_id: DbId,
    /// Nulled when the lease row is deleted.
    pub worker_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for appending a usage row. The owner is looked up from the notebook.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkerSession {
    pub ipv4: String,
    pub notebook_id: DbId,
    pub worker_id: DbId,
    pub user_id: Option<DbId>,
}
