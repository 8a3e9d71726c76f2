use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, Method, StatusCode};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use livenb_core::storage::LocalStorage;
use livenb_db::{PgLeaseStore, PgUsageStore};
use livenb_relay::config::RelayConfig;
use livenb_relay::jobs::{JobRunner, TokioScheduler};
use livenb_relay::launcher::CommandLauncher;
use livenb_relay::relay::Relay;
use livenb_relay::spawner::WorkerSpawner;
use livenb_relay::state::AppState;
use livenb_relay::{routes, ws};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livenb_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = RelayConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        machine_id = %config.machine_id,
        max_running_workers = config.max_running_workers,
        "Loaded relay configuration"
    );

    // --- Database ---
    let pool = livenb_db::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    livenb_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    livenb_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database ready");

    let leases = Arc::new(PgLeaseStore::new(pool.clone()));
    let usage = Arc::new(PgUsageStore::new(pool));

    // --- Jobs ---
    let (scheduler, job_rx) = TokioScheduler::channel();
    let scheduler = Arc::new(scheduler);
    let spawner = WorkerSpawner::new(
        leases.clone(),
        Arc::new(CommandLauncher::new(config.worker_command.clone())),
        scheduler.clone(),
        config.machine_id.clone(),
        config.max_running_workers,
    );
    let storage = Arc::new(LocalStorage::new(&config.storage_root, &config.media_url));
    let job_cancel = tokio_util::sync::CancellationToken::new();
    let job_handle = tokio::spawn(JobRunner::new(spawner, storage).run(job_rx, job_cancel.clone()));

    // --- Relay ---
    let groups = Arc::new(ws::GroupManager::new());
    let heartbeat_cancel = tokio_util::sync::CancellationToken::new();
    let heartbeat_handle = ws::start_heartbeat(
        Arc::clone(&groups),
        Duration::from_secs(config.heartbeat_secs.max(1)),
        heartbeat_cancel.clone(),
    );
    let relay = Arc::new(Relay::new(
        Arc::clone(&groups),
        leases,
        usage,
        scheduler,
        config.stale_after(),
    ));

    let state = AppState {
        config: Arc::new(config.clone()),
        groups: Arc::clone(&groups),
        relay,
    };

    let cors = build_cors_layer(&config);
    let request_id_header = HeaderName::from_static("x-request-id");

    // --- Router ---
    let app = routes::router()
        // -- Middleware stack (applied bottom-up) --
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting relay");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Relay stopped accepting connections, cleaning up");

    job_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), job_handle).await;
    tracing::info!("Job runner stopped");

    heartbeat_cancel.cancel();
    let _ = heartbeat_handle.await;
    groups.shutdown_all().await;

    tracing::info!("Graceful shutdown complete");
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Build the CORS layer. Invalid origins fail startup.
fn build_cors_layer(config: &RelayConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
