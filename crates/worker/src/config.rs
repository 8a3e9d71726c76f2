use std::path::PathBuf;
use std::time::Duration;

use livenb_core::lease::{host_machine_id, DEFAULT_STALE_MINUTES};
use livenb_core::types::DbId;

/// Worker process configuration loaded from environment variables.
///
/// The first four fields are set by the relay's launcher for every
/// spawned process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub notebook_id: DbId,
    pub session_id: String,
    /// Id of the Queued lease this process claims.
    pub worker_id: DbId,
    /// Relay base URL, e.g. `ws://relay:8000`.
    pub server_address: String,
    pub database_url: String,
    pub machine_id: String,
    pub stale_worker_minutes: i64,
    pub keepalive_interval_secs: u64,
    pub max_idle_minutes: Option<u64>,
    pub max_run_minutes: Option<u64>,
    pub kernel_command: String,
    /// Local notebook file; enables dev mode (file source and reload on change).
    pub notebook_path: Option<PathBuf>,
    pub watch_interval_ms: u64,
    pub storage_root: String,
    pub media_url: String,
    pub pdf_command: Option<String>,
    pub theme: String,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                    |
    /// |---------------------------|----------------------------|
    /// | `NOTEBOOK_ID`             | required                   |
    /// | `SESSION_ID`              | required                   |
    /// | `WORKER_ID`               | required                   |
    /// | `SERVER_ADDRESS`          | required                   |
    /// | `DATABASE_URL`            | required                   |
    /// | `MACHINE_ID`              | host name                  |
    /// | `STALE_WORKER_MINUTES`    | `2`                        |
    /// | `KEEPALIVE_INTERVAL_SECS` | `5`                        |
    /// | `MAX_IDLE_MINUTES`        | unset (no limit)           |
    /// | `MAX_RUN_MINUTES`         | unset (no limit)           |
    /// | `KERNEL_COMMAND`          | `python3 -m livenb_kernel` |
    /// | `NOTEBOOK_PATH`           | unset                      |
    /// | `WATCH_INTERVAL_MS`       | `1000`                     |
    /// | `STORAGE_ROOT`            | `./media`                  |
    /// | `MEDIA_URL`               | `/media`                   |
    /// | `PDF_COMMAND`             | unset                      |
    /// | `THEME`                   | `light`                    |
    pub fn from_env() -> Self {
        let notebook_id: DbId = std::env::var("NOTEBOOK_ID")
            .expect("NOTEBOOK_ID must be set")
            .parse()
            .expect("NOTEBOOK_ID must be a valid i64");
        let session_id = std::env::var("SESSION_ID").expect("SESSION_ID must be set");
        let worker_id: DbId = std::env::var("WORKER_ID")
            .expect("WORKER_ID must be set")
            .parse()
            .expect("WORKER_ID must be a valid i64");
        let server_address = std::env::var("SERVER_ADDRESS").expect("SERVER_ADDRESS must be set");
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let machine_id = std::env::var("MACHINE_ID").unwrap_or_else(|_| host_machine_id());

        let stale_worker_minutes: i64 = std::env::var("STALE_WORKER_MINUTES")
            .unwrap_or_else(|_| DEFAULT_STALE_MINUTES.to_string())
            .parse()
            .expect("STALE_WORKER_MINUTES must be a valid i64");

        let keepalive_interval_secs: u64 = std::env::var("KEEPALIVE_INTERVAL_SECS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("KEEPALIVE_INTERVAL_SECS must be a valid u64");

        let max_idle_minutes = optional_u64("MAX_IDLE_MINUTES");
        let max_run_minutes = optional_u64("MAX_RUN_MINUTES");

        let kernel_command = std::env::var("KERNEL_COMMAND")
            .unwrap_or_else(|_| "python3 -m livenb_kernel".into());
        let notebook_path = std::env::var("NOTEBOOK_PATH")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        let watch_interval_ms: u64 = std::env::var("WATCH_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("WATCH_INTERVAL_MS must be a valid u64");

        let storage_root = std::env::var("STORAGE_ROOT").unwrap_or_else(|_| "./media".into());
        let media_url = std::env::var("MEDIA_URL").unwrap_or_else(|_| "/media".into());
        let pdf_command = std::env::var("PDF_COMMAND").ok().filter(|c| !c.is_empty());
        let theme = std::env::var("THEME").unwrap_or_else(|_| "light".into());

        Self {
            notebook_id,
            session_id,
            worker_id,
            server_address,
            database_url,
            machine_id,
            stale_worker_minutes,
            keepalive_interval_secs,
            max_idle_minutes,
            max_run_minutes,
            kernel_command,
            notebook_path,
            watch_interval_ms,
            storage_root,
            media_url,
            pdf_command,
            theme,
        }
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_worker_minutes)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }
}

fn optional_u64(var: &str) -> Option<u64> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse()
                .unwrap_or_else(|_| panic!("{var} must be a valid u64"))
        })
}
