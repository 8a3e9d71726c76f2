use livenb_core::lease::{host_machine_id, DEFAULT_STALE_MINUTES};

/// Relay configuration loaded from environment variables.
///
/// All fields except `database_url` have defaults suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
    pub database_url: String,
    /// Identity of this host in lease `machine_id` columns.
    pub machine_id: String,
    /// Per-host worker cap used by admission control.
    pub max_running_workers: usize,
    pub stale_worker_minutes: i64,
    /// Command line that starts one worker process.
    pub worker_command: String,
    /// Artifact root shared with workers on this host.
    pub storage_root: String,
    pub media_url: String,
    /// Interval of transport pings to every attached socket.
    pub heartbeat_secs: u64,
}

impl RelayConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                 |
    /// |------------------------|-------------------------|
    /// | `HOST`                 | `0.0.0.0`               |
    /// | `PORT`                 | `8000`                  |
    /// | `CORS_ORIGINS`         | `http://localhost:3000` |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                    |
    /// | `DATABASE_URL`         | required                |
    /// | `MACHINE_ID`           | host name               |
    /// | `MAX_RUNNING_WORKERS`  | `20`                    |
    /// | `STALE_WORKER_MINUTES` | `2`                     |
    /// | `WORKER_COMMAND`       | `livenb-worker`         |
    /// | `STORAGE_ROOT`         | `./media`               |
    /// | `MEDIA_URL`            | `/media`                |
    /// | `HEARTBEAT_SECS`       | `30`                    |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let machine_id = std::env::var("MACHINE_ID").unwrap_or_else(|_| host_machine_id());

        let max_running_workers: usize = std::env::var("MAX_RUNNING_WORKERS")
            .unwrap_or_else(|_| "20".into())
            .parse()
            .expect("MAX_RUNNING_WORKERS must be a valid usize");

        let stale_worker_minutes: i64 = std::env::var("STALE_WORKER_MINUTES")
            .unwrap_or_else(|_| DEFAULT_STALE_MINUTES.to_string())
            .parse()
            .expect("STALE_WORKER_MINUTES must be a valid i64");

        let worker_command =
            std::env::var("WORKER_COMMAND").unwrap_or_else(|_| "livenb-worker".into());
        let storage_root = std::env::var("STORAGE_ROOT").unwrap_or_else(|_| "./media".into());
        let media_url = std::env::var("MEDIA_URL").unwrap_or_else(|_| "/media".into());

        let heartbeat_secs: u64 = std::env::var("HEARTBEAT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("HEARTBEAT_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            database_url,
            machine_id,
            max_running_workers,
            stale_worker_minutes,
            worker_command,
            storage_root,
            media_url,
            heartbeat_secs,
        }
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_worker_minutes)
    }
}
