//! Repository for the `worker_sessions` usage audit table.

use livenb_core::types::DbId;
use livenb_core::worker_state::SessionState;
use sqlx::PgPool;

use crate::models::worker_session::{CreateWorkerSession, WorkerSession};

const COLUMNS: &str = "id, ipv4, state, owner_id, user_id, notebook_id, worker_id, \
                       created_at, updated_at";

pub struct WorkerSessionRepo;

impl WorkerSessionRepo {
    /// Append a `Running` row.
    ///
    /// The owner comes from the notebook row. A `worker_id` whose lease is
    /// already gone is stored as NULL.
    pub async fn create(
        pool: &PgPool,
        input: &CreateWorkerSession,
    ) -> Result<WorkerSession, sqlx::Error> {
        let query = format!(
            "INSERT INTO worker_sessions (ipv4, state, owner_id, user_id, notebook_id, worker_id)
             VALUES (
                $1, $2,
                (SELECT owner_id FROM notebooks WHERE id = $3),
                $4, $3,
                (SELECT id FROM workers WHERE id = $5)
             )
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorkerSession>(&query)
            .bind(&input.ipv4)
            .bind(SessionState::Running.id())
            .bind(input.notebook_id)
            .bind(input.user_id)
            .bind(input.worker_id)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<WorkerSession>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM worker_sessions WHERE id = $1");
        sqlx::query_as::<_, WorkerSession>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Set the row state. Returns `true` if the row exists.
    pub async fn set_state(
        pool: &PgPool,
        id: DbId,
        state: SessionState,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE worker_sessions SET state = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(state.id())
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
