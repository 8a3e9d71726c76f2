//! Lease, usage, and notebook persistence against a real database.

use chrono::{Duration, Utc};
use livenb_core::lease::{evict_older_siblings, sweep_stale, LeaseFilter, LeaseUpdate};
use livenb_core::notebook::NotebookConfig;
use livenb_core::store::{LeaseStore, NewWorkerSession, NotebookStore, UsageStore};
use livenb_core::worker_state::{SessionState, WorkerState};
use livenb_db::models::notebook::CreateNotebook;
use livenb_db::repositories::{NotebookRepo, UsageRepo, WorkerSessionRepo};
use livenb_db::{PgLeaseStore, PgNotebookStore, PgUsageStore};
use sqlx::PgPool;

async fn backdate(pool: &PgPool, id: i64, minutes: i64) {
    sqlx::query("UPDATE workers SET updated_at = NOW() - make_interval(mins => $2) WHERE id = $1")
        .bind(id)
        .bind(minutes as i32)
        .execute(pool)
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn health_check_passes_after_migrations(pool: PgPool) {
    livenb_db::health_check(&pool).await.unwrap();
}

// ---------------------------------------------------------------------------
// Leases
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn created_leases_are_queued_and_unclaimed(pool: PgPool) {
    let store = PgLeaseStore::new(pool);
    let a = store.create("abc", 42).await.unwrap();
    let b = store.create("abc", 42).await.unwrap();

    assert!(b.id > a.id);
    assert_eq!(a.state, WorkerState::Queued);
    assert!(a.machine_id.is_empty());
    assert!(store.get(a.id, "abc", 42).await.unwrap().is_some());
    assert!(store.get(a.id, "abc", 7).await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn claim_sets_machine_and_touches_clock(pool: PgPool) {
    let store = PgLeaseStore::new(pool.clone());
    let lease = store.create("abc", 42).await.unwrap();
    backdate(&pool, lease.id, 10).await;

    let claimed = store
        .update(lease.id, &LeaseUpdate::claim("host-a"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.state, WorkerState::Running);
    assert_eq!(claimed.machine_id, "host-a");
    assert!(!claimed.is_stale(Utc::now(), Duration::minutes(2)));

    let machine = store.filter(&LeaseFilter::machine("host-a")).await.unwrap();
    assert_eq!(machine.len(), 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn active_filter_skips_terminal_states(pool: PgPool) {
    let store = PgLeaseStore::new(pool);
    let live = store.create("abc", 42).await.unwrap();
    let ended = store.create("abc", 42).await.unwrap();
    store
        .update(ended.id, &LeaseUpdate::state(WorkerState::MaxRunTimeReached))
        .await
        .unwrap();

    let active = store
        .filter(&LeaseFilter::session(42, "abc").active())
        .await
        .unwrap();
    assert_eq!(active.iter().map(|l| l.id).collect::<Vec<_>>(), vec![live.id]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn newest_worker_evicts_older_siblings(pool: PgPool) {
    let store = PgLeaseStore::new(pool);
    let first = store.create("abc", 42).await.unwrap();
    let second = store.create("abc", 42).await.unwrap();
    let newest = store.create("abc", 42).await.unwrap();
    let elsewhere = store.create("xyz", 42).await.unwrap();

    let evicted = evict_older_siblings(&store, &newest).await.unwrap();
    let mut evicted_ids: Vec<_> = evicted.iter().map(|l| l.id).collect();
    evicted_ids.sort();
    assert_eq!(evicted_ids, vec![first.id, second.id]);

    let remaining = store.filter(&LeaseFilter::session(42, "abc")).await.unwrap();
    assert_eq!(remaining.iter().map(|l| l.id).collect::<Vec<_>>(), vec![newest.id]);
    assert!(store.get(elsewhere.id, "xyz", 42).await.unwrap().is_some());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn stale_sweep_crosses_sessions(pool: PgPool) {
    let store = PgLeaseStore::new(pool.clone());
    let stale = store.create("abc", 1).await.unwrap();
    let fresh = store.create("def", 2).await.unwrap();
    backdate(&pool, stale.id, 30).await;

    let swept = sweep_stale(&store, Utc::now(), Duration::minutes(2)).await.unwrap();
    assert_eq!(swept.iter().map(|l| l.id).collect::<Vec<_>>(), vec![stale.id]);
    assert!(store.get(fresh.id, "def", 2).await.unwrap().is_some());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn deleting_a_lease_nulls_usage_reference(pool: PgPool) {
    let leases = PgLeaseStore::new(pool.clone());
    let usage = PgUsageStore::new(pool.clone());
    let lease = leases.create("abc", 42).await.unwrap();

    let row_id = usage
        .open_session(&NewWorkerSession {
            ipv4: "10.0.0.5".into(),
            notebook_id: 42,
            worker_id: lease.id,
        })
        .await
        .unwrap();
    assert!(leases.delete(lease.id).await.unwrap());
    assert!(!leases.delete(lease.id).await.unwrap());

    let row = WorkerSessionRepo::find_by_id(&pool, row_id).await.unwrap().unwrap();
    assert_eq!(row.worker_id, None);
    assert_eq!(row.state, SessionState::Running.id());
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn closing_a_session_flips_state_to_stopped(pool: PgPool) {
    let usage = PgUsageStore::new(pool.clone());
    let id = usage
        .open_session(&NewWorkerSession {
            ipv4: "10.0.0.5".into(),
            notebook_id: 42,
            worker_id: 999,
        })
        .await
        .unwrap();
    usage.close_session(id).await.unwrap();

    let row = WorkerSessionRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(row.state, SessionState::Stopped.id());
    assert_eq!(row.worker_id, None);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn connection_seconds_accumulate_per_owner(pool: PgPool) {
    let notebook = NotebookRepo::create(
        &pool,
        &CreateNotebook {
            owner_id: Some(7),
            path: "/tmp/nb.ipynb".into(),
            config: None,
        },
    )
    .await
    .unwrap();
    let usage = PgUsageStore::new(pool.clone());
    usage.add_connection_seconds(notebook.id, 30).await.unwrap();
    usage.add_connection_seconds(notebook.id, 15).await.unwrap();

    assert_eq!(UsageRepo::seconds_for_owner(&pool, 7).await.unwrap(), 45);
}

// ---------------------------------------------------------------------------
// Notebooks
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn notebook_loads_document_and_persists_config(pool: PgPool) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("demo.ipynb");
    tokio::fs::write(
        &path,
        r#"{"cells":[{"cell_type":"code","source":"x = 1","outputs":[]}],"metadata":{}}"#,
    )
    .await
    .unwrap();

    let row = NotebookRepo::create(
        &pool,
        &CreateNotebook {
            owner_id: Some(1),
            path: path.display().to_string(),
            config: Some(serde_json::json!({"title": "Demo"})),
        },
    )
    .await
    .unwrap();

    let store = PgNotebookStore::new(pool);
    let source = store.load(row.id).await.unwrap();
    assert_eq!(source.notebook.len(), 1);
    assert_eq!(source.config.title, "Demo");

    let config = NotebookConfig {
        title: "Renamed".into(),
        show_code: true,
        ..Default::default()
    };
    store.save_config(row.id, &config).await.unwrap();
    assert_eq!(store.load(row.id).await.unwrap().config, config);
    assert!(store.load(row.id + 1000).await.is_err());
}
