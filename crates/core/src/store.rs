//! Persistence seams consumed by the relay and the worker.
//!
//! `livenb-db` provides PostgreSQL implementations; [`crate::memory`]
//! provides in-process ones for tests and single-host development.

use async_trait::async_trait;

use crate::error::CoreError;
use crate::lease::{Lease, LeaseFilter, LeaseUpdate};
use crate::notebook::{NotebookConfig, NotebookSource};
use crate::types::DbId;

/// Record store for worker leases.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Insert a `Queued` lease with an empty `machine_id`.
    async fn create(&self, session_id: &str, notebook_id: DbId) -> Result<Lease, CoreError>;

    async fn get(
        &self,
        id: DbId,
        session_id: &str,
        notebook_id: DbId,
    ) -> Result<Option<Lease>, CoreError>;

    async fn filter(&self, filter: &LeaseFilter) -> Result<Vec<Lease>, CoreError>;

    /// Apply `update` and touch `updated_at`. `None` if the lease is gone.
    async fn update(&self, id: DbId, update: &LeaseUpdate) -> Result<Option<Lease>, CoreError>;

    /// Returns `true` if a row was deleted.
    async fn delete(&self, id: DbId) -> Result<bool, CoreError>;

    /// Delete every matching lease, returning the deleted rows.
    async fn delete_matching(&self, filter: &LeaseFilter) -> Result<Vec<Lease>, CoreError>;
}

/// A worker connection as recorded for usage auditing.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWorkerSession {
    /// Address of the machine the worker runs on.
    pub ipv4: String,
    pub notebook_id: DbId,
    pub worker_id: DbId,
}

/// Audit and accounting records.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Append a `Running` usage row for a worker connection.
    async fn open_session(&self, session: &NewWorkerSession) -> Result<DbId, CoreError>;

    /// Flip a usage row to `Stopped`.
    async fn close_session(&self, id: DbId) -> Result<(), CoreError>;

    /// Add client connection time to the notebook owner's usage counter.
    async fn add_connection_seconds(&self, notebook_id: DbId, seconds: i64)
        -> Result<(), CoreError>;
}

/// Where a worker loads its notebook from.
#[async_trait]
pub trait NotebookStore: Send + Sync {
    async fn load(&self, notebook_id: DbId) -> Result<NotebookSource, CoreError>;

    /// Persist derived configuration.
    async fn save_config(&self, notebook_id: DbId, config: &NotebookConfig)
        -> Result<(), CoreError>;
}
