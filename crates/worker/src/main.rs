//! `livenb-worker`: executes one notebook session.
//!
//! Spawned by the relay with the ids of a Queued lease in its environment
//! (see [`WorkerConfig::from_env`]). Exits when the client goes away, the
//! lease goes stale, or a lifecycle limit is reached.

use std::sync::Arc;
use std::time::Duration;

use livenb_core::storage::LocalStorage;
use livenb_core::store::NotebookStore;
use livenb_db::{PgLeaseStore, PgNotebookStore};
use livenb_worker::client::RelayClient;
use livenb_worker::config::WorkerConfig;
use livenb_worker::engine::{Engine, EngineDeps};
use livenb_worker::kernel::SubprocessKernel;
use livenb_worker::lease::{LifecycleLimits, WorkerLease};
use livenb_worker::local_store::FileNotebookStore;
use livenb_worker::render::HtmlRenderer;
use livenb_worker::session::WorkerSession;
use livenb_worker::watch::NotebookWatcher;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livenb_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    tracing::info!(
        notebook_id = config.notebook_id,
        session_id = %config.session_id,
        worker_id = config.worker_id,
        machine_id = %config.machine_id,
        dev_mode = config.notebook_path.is_some(),
        "Starting livenb-worker",
    );

    let pool = livenb_db::create_pool(&config.database_url)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to connect to database");
            std::process::exit(1);
        });

    let kernel = SubprocessKernel::start(&config.kernel_command).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to start kernel");
        std::process::exit(1);
    });

    let notebooks: Arc<dyn NotebookStore> = match &config.notebook_path {
        Some(path) => Arc::new(FileNotebookStore::new(path)),
        None => Arc::new(PgNotebookStore::new(pool.clone())),
    };
    let storage = Arc::new(
        LocalStorage::new(&config.storage_root, &config.media_url)
            .with_pdf_command(config.pdf_command.clone()),
    );

    let cancel = CancellationToken::new();
    let engine = Engine::new(
        config.notebook_id,
        config.session_id.clone(),
        config.theme.clone(),
        EngineDeps {
            notebooks,
            storage,
            renderer: Arc::new(HtmlRenderer),
            kernel: Box::new(kernel),
        },
    )
    .spawn(cancel.child_token());

    let watcher = match &config.notebook_path {
        Some(path) => Some(NotebookWatcher::new(path).await.spawn(
            config.watch_interval(),
            engine.commands.clone(),
            cancel.child_token(),
        )),
        None => None,
    };

    let lease = WorkerLease::new(
        Arc::new(PgLeaseStore::new(pool)),
        config.worker_id,
        config.notebook_id,
        config.session_id.clone(),
        config.machine_id.clone(),
        config.stale_after(),
    );
    let client = RelayClient::new(
        config.server_address.clone(),
        config.notebook_id,
        config.session_id.clone(),
        config.worker_id,
        config.machine_id.clone(),
    );
    let session = WorkerSession::new(
        client,
        lease,
        engine,
        LifecycleLimits::from_minutes(config.max_idle_minutes, config.max_run_minutes),
        config.keepalive_interval(),
    );

    let session_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        session_cancel.cancel();
    });

    let result = session.run(cancel.clone()).await;
    cancel.cancel();
    if let Some(watcher) = watcher {
        let _ = tokio::time::timeout(Duration::from_secs(1), watcher).await;
    }

    match result {
        Ok(reason) => tracing::info!(?reason, "Worker stopped"),
        Err(e) => {
            tracing::error!(error = %e, "Worker failed");
            std::process::exit(1);
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }
}
