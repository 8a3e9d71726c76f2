//! Rows of the `notebooks` table.

use livenb_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct NotebookRow {
    pub id: DbId,
    pub owner_id: Option<DbId>,
    /// Filesystem location of the notebook document.
    pub path: String,
    pub config: serde_json::Value,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateNotebook {
    pub owner_id: Option<DbId>,
    pub path: String,
    pub config: Option<serde_json::Value>,
}
