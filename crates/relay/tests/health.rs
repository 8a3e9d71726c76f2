mod common;

use axum::http::StatusCode;
use common::{assert_status, body_json, build_test_app, fixture, get};
use livenb_core::protocol::{GroupKey, Role};

#[tokio::test]
async fn health_reports_status_version_and_connections() {
    let fx = fixture();
    let _client = fx
        .groups
        .join(&GroupKey::new(Role::Client, 1, "abc"), "c1".into())
        .await;
    let _worker = fx
        .groups
        .join(&GroupKey::new(Role::Worker, 1, "abc"), "w1".into())
        .await;

    let response = get(build_test_app(&fx), "/health").await;

    assert_status(&response, StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["connections"], 2);
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let fx = fixture();
    let response = get(build_test_app(&fx), "/health").await;
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let fx = fixture();
    let response = get(build_test_app(&fx), "/nope").await;
    assert_status(&response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn plain_get_on_a_socket_route_is_rejected() {
    let fx = fixture();
    let response = get(build_test_app(&fx), "/ws/client/1/abc").await;
    assert!(response.status().is_client_error());
}
