//! Starting worker processes.

use std::process::Stdio;

use async_trait::async_trait;
use livenb_core::error::CoreError;
use tokio::process::Command;

use crate::jobs::SpawnRequest;

/// The "start process" capability.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start a worker for `request`, returning its pid.
    async fn start(&self, request: &SpawnRequest) -> Result<u32, CoreError>;
}

/// Runs the configured worker binary as a detached child process.
///
/// The request is passed through `NOTEBOOK_ID`, `SESSION_ID`, `WORKER_ID`,
/// and `SERVER_ADDRESS`; the rest of the environment is inherited.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    command: String,
}

impl CommandLauncher {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn build(&self, request: &SpawnRequest) -> Result<Command, CoreError> {
        let mut parts = self.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| CoreError::capability("process", "WORKER_COMMAND is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(parts)
            .env("NOTEBOOK_ID", request.notebook_id.to_string())
            .env("SESSION_ID", &request.session_id)
            .env("WORKER_ID", request.worker_id.to_string())
            .env("SERVER_ADDRESS", &request.callback_address)
            .stdin(Stdio::null())
            .kill_on_drop(false);
        Ok(cmd)
    }
}

#[async_trait]
impl ProcessLauncher for CommandLauncher {
    async fn start(&self, request: &SpawnRequest) -> Result<u32, CoreError> {
        let mut child = self
            .build(request)?
            .spawn()
            .map_err(|e| CoreError::capability("process", format!("{}: {e}", self.command)))?;
        let pid = child
            .id()
            .ok_or_else(|| CoreError::capability("process", "worker exited before reporting a pid"))?;

        tracing::info!(
            pid,
            notebook_id = request.notebook_id,
            session_id = %request.session_id,
            worker_id = request.worker_id,
            "Started worker process",
        );

        // Reap the child so it does not linger as a zombie.
        let worker_id = request.worker_id;
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::info!(pid, worker_id, %status, "Worker process exited"),
                Err(e) => tracing::warn!(pid, worker_id, error = %e, "Failed to wait on worker process"),
            }
        });
        Ok(pid)
    }
}
