//! In-process store implementations.
//!
//! Used by the test suites and by single-host development setups where the
//! relay and the worker share no database. Ids are assigned from a counter
//! so they keep the monotonic tie-break semantics of the real store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::CoreError;
use crate::lease::{Lease, LeaseFilter, LeaseUpdate};
use crate::notebook::{NotebookConfig, NotebookSource};
use crate::store::{LeaseStore, NewWorkerSession, NotebookStore, UsageStore};
use crate::types::{DbId, Timestamp};
use crate::worker_state::{SessionState, WorkerState};

// ---------------------------------------------------------------------------
// Leases
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LeaseTable {
    last_id: DbId,
    rows: BTreeMap<DbId, Lease>,
}

#[derive(Default)]
pub struct MemoryLeaseStore {
    table: Mutex<LeaseTable>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully specified row. Later `create` calls continue above it.
    pub async fn insert(&self, lease: Lease) {
        let mut table = self.table.lock().await;
        table.last_id = table.last_id.max(lease.id);
        table.rows.insert(lease.id, lease);
    }

    /// Backdate a lease's clock.
    pub async fn set_updated_at(&self, id: DbId, at: Timestamp) {
        if let Some(lease) = self.table.lock().await.rows.get_mut(&id) {
            lease.updated_at = at;
        }
    }

    /// Every row, ordered by id.
    pub async fn all(&self) -> Vec<Lease> {
        self.table.lock().await.rows.values().cloned().collect()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn create(&self, session_id: &str, notebook_id: DbId) -> Result<Lease, CoreError> {
        let mut table = self.table.lock().await;
        table.last_id += 1;
        let now = Utc::now();
        let lease = Lease {
            id: table.last_id,
            session_id: session_id.to_string(),
            notebook_id,
            machine_id: String::new(),
            state: WorkerState::Queued,
            created_at: now,
            updated_at: now,
        };
        table.rows.insert(lease.id, lease.clone());
        Ok(lease)
    }

    async fn get(
        &self,
        id: DbId,
        session_id: &str,
        notebook_id: DbId,
    ) -> Result<Option<Lease>, CoreError> {
        Ok(self
            .table
            .lock()
            .await
            .rows
            .get(&id)
            .filter(|l| l.session_id == session_id && l.notebook_id == notebook_id)
            .cloned())
    }

    async fn filter(&self, filter: &LeaseFilter) -> Result<Vec<Lease>, CoreError> {
        Ok(self
            .table
            .lock()
            .await
            .rows
            .values()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect())
    }

    async fn update(&self, id: DbId, update: &LeaseUpdate) -> Result<Option<Lease>, CoreError> {
        let mut table = self.table.lock().await;
        let Some(lease) = table.rows.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(state) = update.state {
            lease.state = state;
        }
        if let Some(machine) = &update.machine_id {
            lease.machine_id = machine.clone();
        }
        lease.updated_at = Utc::now();
        Ok(Some(lease.clone()))
    }

    async fn delete(&self, id: DbId) -> Result<bool, CoreError> {
        Ok(self.table.lock().await.rows.remove(&id).is_some())
    }

    async fn delete_matching(&self, filter: &LeaseFilter) -> Result<Vec<Lease>, CoreError> {
        let mut table = self.table.lock().await;
        let ids: Vec<DbId> = table
            .rows
            .values()
            .filter(|l| filter.matches(l))
            .map(|l| l.id)
            .collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| table.rows.remove(&id))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct UsageRow {
    pub session: NewWorkerSession,
    pub state: SessionState,
}

#[derive(Default)]
struct UsageTables {
    last_id: DbId,
    sessions: BTreeMap<DbId, UsageRow>,
    seconds: HashMap<DbId, i64>,
}

#[derive(Default)]
pub struct MemoryUsageStore {
    tables: Mutex<UsageTables>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sessions(&self) -> Vec<UsageRow> {
        self.tables.lock().await.sessions.values().cloned().collect()
    }

    /// Accumulated connection seconds for a notebook.
    pub async fn seconds_for(&self, notebook_id: DbId) -> i64 {
        self.tables
            .lock()
            .await
            .seconds
            .get(&notebook_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn open_session(&self, session: &NewWorkerSession) -> Result<DbId, CoreError> {
        let mut tables = self.tables.lock().await;
        tables.last_id += 1;
        let id = tables.last_id;
        tables.sessions.insert(
            id,
            UsageRow {
                session: session.clone(),
                state: SessionState::Running,
            },
        );
        Ok(id)
    }

    async fn close_session(&self, id: DbId) -> Result<(), CoreError> {
        let mut tables = self.tables.lock().await;
        let row = tables.sessions.get_mut(&id).ok_or(CoreError::NotFound {
            entity: "worker_session",
            id,
        })?;
        row.state = SessionState::Stopped;
        Ok(())
    }

    async fn add_connection_seconds(
        &self,
        notebook_id: DbId,
        seconds: i64,
    ) -> Result<(), CoreError> {
        *self
            .tables
            .lock()
            .await
            .seconds
            .entry(notebook_id)
            .or_default() += seconds;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notebooks
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryNotebookStore {
    notebooks: Mutex<HashMap<DbId, NotebookSource>>,
    saved: Mutex<Vec<(DbId, NotebookConfig)>>,
}

impl MemoryNotebookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, source: NotebookSource) {
        self.notebooks
            .lock()
            .await
            .insert(source.notebook_id, source);
    }

    /// Every `save_config` call so far, in order.
    pub async fn saved_configs(&self) -> Vec<(DbId, NotebookConfig)> {
        self.saved.lock().await.clone()
    }
}

#[async_trait]
impl NotebookStore for MemoryNotebookStore {
    async fn load(&self, notebook_id: DbId) -> Result<NotebookSource, CoreError> {
        self.notebooks
            .lock()
            .await
            .get(&notebook_id)
            .cloned()
            .ok_or(CoreError::NotFound {
                entity: "notebook",
                id: notebook_id,
            })
    }

    async fn save_config(
        &self,
        notebook_id: DbId,
        config: &NotebookConfig,
    ) -> Result<(), CoreError> {
        if let Some(source) = self.notebooks.lock().await.get_mut(&notebook_id) {
            source.config = config.clone();
        }
        self.saved.lock().await.push((notebook_id, config.clone()));
        Ok(())
    }
}
