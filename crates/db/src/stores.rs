//! PostgreSQL adapters for the `livenb-core` store traits.

use async_trait::async_trait;
use livenb_core::error::CoreError;
use livenb_core::lease::{Lease, LeaseFilter, LeaseUpdate};
use livenb_core::notebook::{Notebook, NotebookConfig, NotebookSource};
use livenb_core::store::{LeaseStore, NewWorkerSession, NotebookStore, UsageStore};
use livenb_core::types::DbId;
use livenb_core::worker_state::SessionState;
use sqlx::PgPool;

use crate::models::worker_session::CreateWorkerSession;
use crate::repositories::{NotebookRepo, UsageRepo, WorkerRepo, WorkerSessionRepo};

fn db_err(capability: &'static str) -> impl Fn(sqlx::Error) -> CoreError {
    move |e| CoreError::capability(capability, e)
}

// ---------------------------------------------------------------------------
// Leases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgLeaseStore {
    pool: PgPool,
}

impl PgLeaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseStore for PgLeaseStore {
    async fn create(&self, session_id: &str, notebook_id: DbId) -> Result<Lease, CoreError> {
        WorkerRepo::create(&self.pool, session_id, notebook_id)
            .await
            .map(|w| w.into_lease())
            .map_err(db_err("lease-store"))
    }

    async fn get(
        &self,
        id: DbId,
        session_id: &str,
        notebook_id: DbId,
    ) -> Result<Option<Lease>, CoreError> {
        WorkerRepo::find(&self.pool, id, session_id, notebook_id)
            .await
            .map(|w| w.map(|w| w.into_lease()))
            .map_err(db_err("lease-store"))
    }

    async fn filter(&self, filter: &LeaseFilter) -> Result<Vec<Lease>, CoreError> {
        WorkerRepo::filter(&self.pool, filter)
            .await
            .map(|rows| rows.into_iter().map(|w| w.into_lease()).collect())
            .map_err(db_err("lease-store"))
    }

    async fn update(&self, id: DbId, update: &LeaseUpdate) -> Result<Option<Lease>, CoreError> {
        WorkerRepo::update(&self.pool, id, update)
            .await
            .map(|w| w.map(|w| w.into_lease()))
            .map_err(db_err("lease-store"))
    }

    async fn delete(&self, id: DbId) -> Result<bool, CoreError> {
        WorkerRepo::delete(&self.pool, id)
            .await
            .map_err(db_err("lease-store"))
    }

    async fn delete_matching(&self, filter: &LeaseFilter) -> Result<Vec<Lease>, CoreError> {
        WorkerRepo::delete_matching(&self.pool, filter)
            .await
            .map(|rows| rows.into_iter().map(|w| w.into_lease()).collect())
            .map_err(db_err("lease-store"))
    }
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgUsageStore {
    pool: PgPool,
}

impl PgUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn open_session(&self, session: &NewWorkerSession) -> Result<DbId, CoreError> {
        let input = CreateWorkerSession {
            ipv4: session.ipv4.clone(),
            notebook_id: session.notebook_id,
            worker_id: session.worker_id,
            user_id: None,
        };
        WorkerSessionRepo::create(&self.pool, &input)
            .await
            .map(|row| row.id)
            .map_err(db_err("usage-store"))
    }

    async fn close_session(&self, id: DbId) -> Result<(), CoreError> {
        let found = WorkerSessionRepo::set_state(&self.pool, id, SessionState::Stopped)
            .await
            .map_err(db_err("usage-store"))?;
        if !found {
            return Err(CoreError::NotFound {
                entity: "worker_session",
                id,
            });
        }
        Ok(())
    }

    async fn add_connection_seconds(
        &self,
        notebook_id: DbId,
        seconds: i64,
    ) -> Result<(), CoreError> {
        let metered = UsageRepo::add_seconds_for_notebook(&self.pool, notebook_id, seconds)
            .await
            .map_err(db_err("usage-store"))?;
        if !metered {
            tracing::debug!(notebook_id, seconds, "Notebook has no owner; usage not metered");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notebooks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgNotebookStore {
    pool: PgPool,
}

impl PgNotebookStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotebookStore for PgNotebookStore {
    async fn load(&self, notebook_id: DbId) -> Result<NotebookSource, CoreError> {
        let row = NotebookRepo::find_by_id(&self.pool, notebook_id)
            .await
            .map_err(db_err("notebook-store"))?
            .ok_or(CoreError::NotFound {
                entity: "notebook",
                id: notebook_id,
            })?;
        let notebook = Notebook::from_path(std::path::Path::new(&row.path)).await?;
        let config: NotebookConfig = serde_json::from_value(row.config).map_err(|e| {
            CoreError::Validation(format!("Malformed config for notebook {notebook_id}: {e}"))
        })?;
        Ok(NotebookSource {
            notebook_id,
            owner_id: row.owner_id,
            notebook,
            config,
        })
    }

    async fn save_config(
        &self,
        notebook_id: DbId,
        config: &NotebookConfig,
    ) -> Result<(), CoreError> {
        let value = serde_json::to_value(config).map_err(|e| CoreError::Internal(e.to_string()))?;
        let found = NotebookRepo::update_config(&self.pool, notebook_id, &value)
            .await
            .map_err(db_err("notebook-store"))?;
        if !found {
            return Err(CoreError::NotFound {
                entity: "notebook",
                id: notebook_id,
            });
        }
        Ok(())
    }
}
