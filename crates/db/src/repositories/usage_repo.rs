//! Repository for the `usage_counters` table.

use livenb_core::types::DbId;
use sqlx::PgPool;

pub struct UsageRepo;

impl UsageRepo {
    /// Add `seconds` to the counter of the notebook's owner.
    ///
    /// Notebooks without an owner are not metered; returns `false` then.
    pub async fn add_seconds_for_notebook(
        pool: &PgPool,
        notebook_id: DbId,
        seconds: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO usage_counters (owner_id, seconds)
             SELECT owner_id, $2 FROM notebooks WHERE id = $1 AND owner_id IS NOT NULL
             ON CONFLICT (owner_id) DO UPDATE SET
                seconds = usage_counters.seconds + EXCLUDED.seconds,
                updated_at = NOW()",
        )
        .bind(notebook_id)
        .bind(seconds)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Accumulated seconds for an owner; zero when never metered.
    pub async fn seconds_for_owner(pool: &PgPool, owner_id: DbId) -> Result<i64, sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT seconds FROM usage_counters WHERE owner_id = $1")
                .bind(owner_id)
                .fetch_optional(pool)
                .await?;
        Ok(row.map_or(0, |r| r.0))
    }
}
