//! Repository for the `notebooks` table.

use livenb_core::types::DbId;
use sqlx::PgPool;

use crate::models::notebook::{CreateNotebook, NotebookRow};

const COLUMNS: &str = "id, owner_id, path, config, updated_at";

pub struct NotebookRepo;

impl NotebookRepo {
    pub async fn create(pool: &PgPool, input: &CreateNotebook) -> Result<NotebookRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO notebooks (owner_id, path, config)
             VALUES ($1, $2, COALESCE($3, '{{}}'::jsonb))
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, NotebookRow>(&query)
            .bind(input.owner_id)
            .bind(&input.path)
            .bind(&input.config)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<NotebookRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM notebooks WHERE id = $1");
        sqlx::query_as::<_, NotebookRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Replace the persisted config. Returns `true` if the notebook exists.
    pub async fn update_config(
        pool: &PgPool,
        id: DbId,
        config: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE notebooks SET config = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(config)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
