//! Session relay protocol.
//!
//! Payloads are opaque except for their `purpose`. Client frames go to the
//! session's `worker` group and worker frames go to its `client` group.
//! The relay itself acts on three client events: an open with a callback
//! address, `worker-ping`, and disconnect.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use livenb_core::error::CoreError;
use livenb_core::lease::{find_active, sweep_stale, Lease};
use livenb_core::protocol::{
    close_worker_frame, parse_client_message, peek_purpose, ClientMessage, GroupKey, Purpose, Role,
};
use livenb_core::store::{LeaseStore, NewWorkerSession, UsageStore};
use livenb_core::types::DbId;
use tokio::sync::Mutex;

use crate::jobs::{Job, JobScheduler, SpawnRequest};
use crate::ws::GroupManager;

/// Per-connection state of a browser client.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub conn_id: String,
    pub notebook_id: DbId,
    pub session_id: String,
    /// Relay address spawned workers connect back to.
    pub server_address: Option<String>,
    pub opened_at: Instant,
}

impl ClientSession {
    pub fn new(
        conn_id: impl Into<String>,
        notebook_id: DbId,
        session_id: impl Into<String>,
        server_address: Option<String>,
    ) -> Self {
        Self {
            conn_id: conn_id.into(),
            notebook_id,
            session_id: session_id.into(),
            server_address: server_address.filter(|a| !a.is_empty()),
            opened_at: Instant::now(),
        }
    }

    pub fn group(&self) -> GroupKey {
        GroupKey::new(Role::Client, self.notebook_id, self.session_id.clone())
    }
}

/// Per-connection state of a worker process.
#[derive(Debug, Clone)]
pub struct WorkerSession {
    pub conn_id: String,
    pub notebook_id: DbId,
    pub session_id: String,
    pub worker_id: DbId,
    /// Usage audit row, when it could be recorded.
    pub usage_id: Option<DbId>,
}

impl WorkerSession {
    pub fn group(&self) -> GroupKey {
        GroupKey::new(Role::Worker, self.notebook_id, self.session_id.clone())
    }
}

/// What the relay did with one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Forwarded to this many peer connections.
    Forwarded(usize),
    /// A lease was created and a spawn job submitted.
    Spawned,
    /// Handled by the relay without forwarding.
    Handled,
    /// Malformed, unknown, or sent by the wrong role.
    Dropped,
}

pub struct Relay {
    groups: Arc<GroupManager>,
    leases: Arc<dyn LeaseStore>,
    usage: Arc<dyn UsageStore>,
    scheduler: Arc<dyn JobScheduler>,
    stale_after: chrono::Duration,
    /// Serializes the check-then-create of "need worker" within this process.
    spawn_guard: Mutex<()>,
}

impl Relay {
    pub fn new(
        groups: Arc<GroupManager>,
        leases: Arc<dyn LeaseStore>,
        usage: Arc<dyn UsageStore>,
        scheduler: Arc<dyn JobScheduler>,
        stale_after: chrono::Duration,
    ) -> Self {
        Self {
            groups,
            leases,
            usage,
            scheduler,
            stale_after,
            spawn_guard: Mutex::new(()),
        }
    }

    pub fn groups(&self) -> &Arc<GroupManager> {
        &self.groups
    }

    // -- client role -------------------------------------------------------

    /// A client connected. Spawns a worker when a callback address is known.
    pub async fn client_opened(&self, session: &ClientSession) -> Result<Option<Lease>, CoreError> {
        match &session.server_address {
            Some(address) => self.need_worker(session, address).await,
            None => Ok(None),
        }
    }

    /// Ensure the session has a live lease, creating one if it has none.
    ///
    /// Returns the created lease, or `None` when one was already active.
    pub async fn need_worker(
        &self,
        session: &ClientSession,
        callback_address: &str,
    ) -> Result<Option<Lease>, CoreError> {
        let _guard = self.spawn_guard.lock().await;
        if let Some(existing) =
            find_active(self.leases.as_ref(), session.notebook_id, &session.session_id).await?
        {
            tracing::debug!(
                notebook_id = session.notebook_id,
                session_id = %session.session_id,
                worker_id = existing.id,
                state = ?existing.state,
                "Session already has a live worker",
            );
            return Ok(None);
        }

        let lease = self
            .leases
            .create(&session.session_id, session.notebook_id)
            .await?;
        self.scheduler.submit(Job::SpawnWorker(SpawnRequest {
            notebook_id: session.notebook_id,
            session_id: session.session_id.clone(),
            worker_id: lease.id,
            callback_address: callback_address.to_string(),
        }));
        tracing::info!(
            notebook_id = session.notebook_id,
            session_id = %session.session_id,
            worker_id = lease.id,
            "Queued worker lease and submitted spawn job",
        );
        Ok(Some(lease))
    }

    /// Route one text frame from a client.
    pub async fn handle_client_text(
        &self,
        session: &mut ClientSession,
        text: &str,
    ) -> Result<Disposition, CoreError> {
        let Some(purpose) = accepted_purpose(Role::Client, text, &session.conn_id) else {
            return Ok(Disposition::Dropped);
        };
        let worker_group = session.group().peer();

        match purpose {
            Purpose::WorkerPing => {
                let outcome = self.handle_ping(session, text).await;
                // The sweep runs even when the ping itself failed.
                if let Err(e) = self.sweep_stale().await {
                    tracing::warn!(error = %e, "Stale lease sweep failed");
                }
                outcome
            }
            Purpose::ServerAddress => {
                let Ok(ClientMessage::ServerAddress { address }) = parse_client_message(text)
                else {
                    tracing::warn!(conn_id = %session.conn_id, "Malformed server-address frame");
                    return Ok(Disposition::Dropped);
                };
                session.server_address = Some(address.clone());
                Ok(match self.need_worker(session, &address).await? {
                    Some(_) => Disposition::Spawned,
                    None => Disposition::Handled,
                })
            }
            _ => Ok(Disposition::Forwarded(
                self.groups.broadcast_text(&worker_group, text).await,
            )),
        }
    }

    async fn handle_ping(
        &self,
        session: &ClientSession,
        text: &str,
    ) -> Result<Disposition, CoreError> {
        let active =
            find_active(self.leases.as_ref(), session.notebook_id, &session.session_id).await?;
        if active.is_some() {
            let delivered = self
                .groups
                .broadcast_text(&session.group().peer(), text)
                .await;
            return Ok(Disposition::Forwarded(delivered));
        }
        match &session.server_address {
            Some(address) => Ok(match self.need_worker(session, address).await? {
                Some(_) => Disposition::Spawned,
                None => Disposition::Handled,
            }),
            None => {
                tracing::debug!(
                    conn_id = %session.conn_id,
                    "No live worker and no callback address; cannot spawn",
                );
                Ok(Disposition::Handled)
            }
        }
    }

    /// A client disconnected: tell the worker to stop and meter the time.
    pub async fn client_closed(&self, session: &ClientSession) {
        let delivered = self
            .groups
            .broadcast_text(&session.group().peer(), close_worker_frame())
            .await;
        let seconds = session.opened_at.elapsed().as_secs() as i64;
        tracing::debug!(
            notebook_id = session.notebook_id,
            session_id = %session.session_id,
            delivered,
            seconds,
            "Client closed; sent close-worker",
        );
        if let Err(e) = self
            .usage
            .add_connection_seconds(session.notebook_id, seconds)
            .await
        {
            tracing::warn!(notebook_id = session.notebook_id, error = %e, "Failed to record usage");
        }
    }

    // -- worker role -------------------------------------------------------

    /// A worker connected: append its usage row.
    pub async fn worker_opened(
        &self,
        conn_id: impl Into<String>,
        notebook_id: DbId,
        session_id: impl Into<String>,
        worker_id: DbId,
        machine: Option<String>,
    ) -> WorkerSession {
        let session_id = session_id.into();
        let usage = NewWorkerSession {
            ipv4: machine.unwrap_or_default(),
            notebook_id,
            worker_id,
        };
        let usage_id = match self.usage.open_session(&usage).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(worker_id, error = %e, "Failed to record worker session");
                None
            }
        };
        WorkerSession {
            conn_id: conn_id.into(),
            notebook_id,
            session_id,
            worker_id,
            usage_id,
        }
    }

    /// Route one text frame from a worker to the session's clients.
    pub async fn handle_worker_text(&self, session: &WorkerSession, text: &str) -> Disposition {
        if accepted_purpose(Role::Worker, text, &session.conn_id).is_none() {
            return Disposition::Dropped;
        }
        Disposition::Forwarded(
            self.groups
                .broadcast_text(&session.group().peer(), text)
                .await,
        )
    }

    /// A worker disconnected: close its usage row.
    pub async fn worker_closed(&self, session: &WorkerSession) {
        let Some(id) = session.usage_id else {
            return;
        };
        if let Err(e) = self.usage.close_session(id).await {
            tracing::warn!(worker_id = session.worker_id, error = %e, "Failed to close worker session");
        }
    }

    // -- housekeeping ------------------------------------------------------

    /// Delete stale leases system-wide and schedule cleanup of their sessions.
    pub async fn sweep_stale(&self) -> Result<Vec<Lease>, CoreError> {
        let swept = sweep_stale(self.leases.as_ref(), Utc::now(), self.stale_after).await?;
        if swept.is_empty() {
            return Ok(swept);
        }
        let mut sessions: Vec<String> = swept.iter().map(|l| l.session_id.clone()).collect();
        sessions.sort();
        sessions.dedup();
        tracing::info!(count = swept.len(), ?sessions, "Swept stale worker leases");
        self.scheduler.submit(Job::CleanupSessions(sessions));
        Ok(swept)
    }
}

/// Peek a frame's purpose and check that `role` may send it.
fn accepted_purpose(role: Role, text: &str, conn_id: &str) -> Option<Purpose> {
    match peek_purpose(text) {
        Ok(purpose) if purpose.sent_by(role) => Some(purpose),
        Ok(purpose) => {
            tracing::warn!(conn_id, role = role.as_str(), ?purpose, "Dropping frame sent by the wrong role");
            None
        }
        Err(e) => {
            tracing::warn!(conn_id, role = role.as_str(), error = %e, "Dropping unrecognised frame");
            None
        }
    }
}
