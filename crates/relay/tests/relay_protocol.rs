//! Relay protocol behaviour over in-memory stores.

mod common;

use assert_matches::assert_matches;
use axum::extract::ws::Message;
use chrono::{Duration, Utc};
use livenb_core::lease::{Lease, LeaseUpdate};
use livenb_core::protocol::{GroupKey, Role};
use livenb_core::store::LeaseStore;
use livenb_core::worker_state::{SessionState, WorkerState};
use livenb_relay::jobs::Job;
use livenb_relay::relay::{ClientSession, Disposition};

const ADDRESS: &str = "ws://relay.internal:8000";

fn session(address: Option<&str>) -> ClientSession {
    ClientSession::new("conn-c", 42, "abc", address.map(str::to_string))
}

fn worker_group() -> GroupKey {
    GroupKey::new(Role::Worker, 42, "abc")
}

fn client_group() -> GroupKey {
    GroupKey::new(Role::Client, 42, "abc")
}

fn text_of(msg: Message) -> String {
    match msg {
        Message::Text(t) => t.as_str().to_owned(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Client open
// ---------------------------------------------------------------------------

#[tokio::test]
async fn open_without_lease_creates_one_queued_lease_and_one_spawn_job() {
    let fx = common::fixture();

    let created = fx.relay.client_opened(&session(Some(ADDRESS))).await.unwrap();

    let lease = created.expect("a lease should be created");
    assert_eq!(lease.state, WorkerState::Queued);
    assert_eq!(fx.leases.all().await.len(), 1);

    let spawns = fx.scheduler.spawn_jobs();
    assert_eq!(spawns.len(), 1);
    assert_eq!(spawns[0].worker_id, lease.id);
    assert_eq!(spawns[0].notebook_id, 42);
    assert_eq!(spawns[0].session_id, "abc");
    assert_eq!(spawns[0].callback_address, ADDRESS);
}

#[tokio::test]
async fn rapid_repeated_opens_do_not_create_a_second_lease() {
    let fx = common::fixture();
    let s = session(Some(ADDRESS));

    let (a, b) = tokio::join!(fx.relay.client_opened(&s), fx.relay.client_opened(&s));
    fx.relay.client_opened(&s).await.unwrap();

    assert_eq!(
        [a.unwrap().is_some(), b.unwrap().is_some()]
            .iter()
            .filter(|created| **created)
            .count(),
        1
    );
    assert_eq!(fx.leases.all().await.len(), 1);
    assert_eq!(fx.scheduler.spawn_jobs().len(), 1);
}

#[tokio::test]
async fn open_without_callback_address_spawns_nothing() {
    let fx = common::fixture();
    assert!(fx.relay.client_opened(&session(None)).await.unwrap().is_none());
    assert!(fx.leases.all().await.is_empty());
    assert!(fx.scheduler.jobs().is_empty());
}

#[tokio::test]
async fn ended_leases_do_not_count_as_live_workers() {
    let fx = common::fixture();
    let old = fx.leases.create("abc", 42).await.unwrap();
    fx.leases
        .update(old.id, &LeaseUpdate::state(WorkerState::MaxIdleTimeReached))
        .await
        .unwrap();

    assert!(fx.relay.client_opened(&session(Some(ADDRESS))).await.unwrap().is_some());
    assert_eq!(fx.scheduler.spawn_jobs().len(), 1);
}

// ---------------------------------------------------------------------------
// server-address
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_address_frame_records_address_and_spawns() {
    let fx = common::fixture();
    let mut s = session(None);

    let disposition = fx
        .relay
        .handle_client_text(&mut s, r#"{"purpose":"server-address","address":"ws://r:1"}"#)
        .await
        .unwrap();

    assert_eq!(disposition, Disposition::Spawned);
    assert_eq!(s.server_address.as_deref(), Some("ws://r:1"));
    assert_eq!(fx.scheduler.spawn_jobs()[0].callback_address, "ws://r:1");
}

// ---------------------------------------------------------------------------
// worker-ping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_without_live_worker_spawns_one() {
    let fx = common::fixture();
    let mut s = session(Some(ADDRESS));

    let disposition = fx
        .relay
        .handle_client_text(&mut s, r#"{"purpose":"worker-ping"}"#)
        .await
        .unwrap();

    assert_eq!(disposition, Disposition::Spawned);
    assert_eq!(fx.leases.all().await.len(), 1);
}

#[tokio::test]
async fn ping_with_live_worker_is_forwarded_to_worker_group() {
    let fx = common::fixture();
    let mut s = session(Some(ADDRESS));
    fx.relay.client_opened(&s).await.unwrap();
    let mut worker = fx.groups.join(&worker_group(), "conn-w".into()).await;

    let disposition = fx
        .relay
        .handle_client_text(&mut s, r#"{"purpose":"worker-ping"}"#)
        .await
        .unwrap();

    assert_eq!(disposition, Disposition::Forwarded(1));
    assert_eq!(text_of(worker.try_recv().unwrap()), r#"{"purpose":"worker-ping"}"#);
    assert_eq!(fx.scheduler.spawn_jobs().len(), 1);
}

#[tokio::test]
async fn any_ping_sweeps_stale_leases_of_other_sessions() {
    let fx = common::fixture();
    let now = Utc::now();
    fx.leases
        .insert(Lease {
            id: 3,
            session_id: "someone-else".into(),
            notebook_id: 7,
            machine_id: "host-b".into(),
            state: WorkerState::Running,
            created_at: now - Duration::minutes(40),
            updated_at: now - Duration::minutes(30),
        })
        .await;
    let mut s = session(Some(ADDRESS));

    fx.relay
        .handle_client_text(&mut s, r#"{"purpose":"worker-ping"}"#)
        .await
        .unwrap();

    let remaining = fx.leases.all().await;
    assert!(remaining.iter().all(|l| l.id != 3));
    assert!(fx
        .scheduler
        .jobs()
        .iter()
        .any(|(job, _)| job == &Job::CleanupSessions(vec!["someone-else".into()])));
}

#[tokio::test]
async fn fresh_leases_survive_the_sweep() {
    let fx = common::fixture();
    fx.leases.create("abc", 42).await.unwrap();

    let swept = fx.relay.sweep_stale().await.unwrap();

    assert!(swept.is_empty());
    assert!(fx.scheduler.jobs().is_empty());
}

// ---------------------------------------------------------------------------
// Forwarding
// ---------------------------------------------------------------------------

#[tokio::test]
async fn client_frames_are_forwarded_raw() {
    let fx = common::fixture();
    let mut worker = fx.groups.join(&worker_group(), "conn-w".into()).await;
    let mut s = session(None);
    let frame = r#"{"purpose":"run-notebook","widgets":{"w1.3":5},"extra":[1,2]}"#;

    let disposition = fx.relay.handle_client_text(&mut s, frame).await.unwrap();

    assert_eq!(disposition, Disposition::Forwarded(1));
    assert_eq!(text_of(worker.try_recv().unwrap()), frame);
}

#[tokio::test]
async fn unknown_or_misdirected_client_frames_are_dropped() {
    let fx = common::fixture();
    let mut worker = fx.groups.join(&worker_group(), "conn-w".into()).await;
    let mut s = session(None);

    for frame in [
        r#"{"purpose":"format-disk"}"#,
        "not json",
        r#"{"purpose":"executed-notebook","body":"<p>forged</p>"}"#,
    ] {
        let disposition = fx.relay.handle_client_text(&mut s, frame).await.unwrap();
        assert_eq!(disposition, Disposition::Dropped, "frame {frame}");
    }
    assert!(worker.try_recv().is_err());
}

#[tokio::test]
async fn worker_frames_reach_the_client_group_only() {
    let fx = common::fixture();
    let mut client = fx.groups.join(&client_group(), "conn-c".into()).await;
    let mut other = fx
        .groups
        .join(&GroupKey::new(Role::Client, 42, "xyz"), "conn-x".into())
        .await;
    let ws = fx.relay.worker_opened("conn-w", 42, "abc", 9, None).await;
    let frame = r#"{"purpose":"executed-notebook","body":"<p>ok</p>"}"#;

    assert_eq!(fx.relay.handle_worker_text(&ws, frame).await, Disposition::Forwarded(1));
    assert_eq!(text_of(client.try_recv().unwrap()), frame);
    assert!(other.try_recv().is_err());

    assert_eq!(
        fx.relay.handle_worker_text(&ws, r#"{"purpose":"run-notebook"}"#).await,
        Disposition::Dropped
    );
}

// ---------------------------------------------------------------------------
// Disconnects and usage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn client_disconnect_sends_close_worker_and_meters_time() {
    let fx = common::fixture();
    let mut worker = fx.groups.join(&worker_group(), "conn-w".into()).await;

    fx.relay.client_closed(&session(None)).await;

    let frame: serde_json::Value =
        serde_json::from_str(&text_of(worker.try_recv().unwrap())).unwrap();
    assert_eq!(frame["purpose"], "close-worker");
    // Elapsed time is whole seconds; a near-instant session records zero.
    assert_eq!(fx.usage.seconds_for(42).await, 0);
}

#[tokio::test]
async fn client_disconnect_without_worker_is_harmless() {
    let fx = common::fixture();
    fx.relay.client_closed(&session(None)).await;
    assert_eq!(fx.groups.connection_count().await, 0);
}

#[tokio::test]
async fn worker_connection_appends_and_closes_usage_row() {
    let fx = common::fixture();

    let ws = fx
        .relay
        .worker_opened("conn-w", 42, "abc", 9, Some("10.1.2.3".into()))
        .await;
    assert_matches!(ws.usage_id, Some(_));

    let rows = fx.usage.sessions().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].session.ipv4, "10.1.2.3");
    assert_eq!(rows[0].session.worker_id, 9);
    assert_eq!(rows[0].state, SessionState::Running);

    fx.relay.worker_closed(&ws).await;
    assert_eq!(fx.usage.sessions().await[0].state, SessionState::Stopped);
}
