use std::sync::Arc;

use crate::config::RelayConfig;
use crate::relay::Relay;
use crate::ws::GroupManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    /// Fan-out groups of both roles.
    pub groups: Arc<GroupManager>,
    pub relay: Arc<Relay>,
}
