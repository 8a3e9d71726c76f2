//! Admission-controlled worker spawning.
//!
//! The cap counts leases already claimed by processes on this host. When
//! it is exceeded the job is resubmitted after [`SPAWN_RETRY_DELAY`], with
//! no retry limit: under sustained overload the retry chains keep growing
//! rather than rejecting sessions. The count and the launch are not atomic,
//! so concurrent requests may overshoot the cap until the next check.

use std::sync::Arc;
use std::time::Duration;

use livenb_core::error::CoreError;
use livenb_core::lease::count_on_machine;
use livenb_core::store::LeaseStore;

use crate::jobs::{Job, JobScheduler, SpawnRequest};
use crate::launcher::ProcessLauncher;

/// Delay before an over-capacity spawn is retried.
pub const SPAWN_RETRY_DELAY: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    Started { pid: u32 },
    /// Host over capacity; the job was resubmitted with a delay.
    Deferred { running: usize },
}

#[derive(Clone)]
pub struct WorkerSpawner {
    leases: Arc<dyn LeaseStore>,
    launcher: Arc<dyn ProcessLauncher>,
    scheduler: Arc<dyn JobScheduler>,
    machine_id: String,
    max_running: usize,
}

impl WorkerSpawner {
    pub fn new(
        leases: Arc<dyn LeaseStore>,
        launcher: Arc<dyn ProcessLauncher>,
        scheduler: Arc<dyn JobScheduler>,
        machine_id: impl Into<String>,
        max_running: usize,
    ) -> Self {
        Self {
            leases,
            launcher,
            scheduler,
            machine_id: machine_id.into(),
            max_running,
        }
    }

    pub async fn spawn(&self, request: SpawnRequest) -> Result<SpawnOutcome, CoreError> {
        let running = count_on_machine(self.leases.as_ref(), &self.machine_id).await?;
        if running > self.max_running {
            tracing::info!(
                machine_id = %self.machine_id,
                running,
                max_running = self.max_running,
                worker_id = request.worker_id,
                retry_in_secs = SPAWN_RETRY_DELAY.as_secs(),
                "Host over capacity; deferring worker spawn",
            );
            self.scheduler
                .submit_delayed(Job::SpawnWorker(request), SPAWN_RETRY_DELAY);
            return Ok(SpawnOutcome::Deferred { running });
        }

        let pid = self.launcher.start(&request).await?;
        Ok(SpawnOutcome::Started { pid })
    }
}
