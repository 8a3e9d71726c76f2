//! HTTP route table.

pub mod health;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// All routes without middleware.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .route(
            "/ws/client/{notebook_id}/{session_id}",
            get(ws::client_ws_handler),
        )
        .route(
            "/ws/worker/{notebook_id}/{session_id}/{worker_id}",
            get(ws::worker_ws_handler),
        )
}
