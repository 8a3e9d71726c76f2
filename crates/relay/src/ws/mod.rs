//! WebSocket infrastructure: group fan-out, upgrade handlers for both
//! roles, and the keep-alive ping task.

mod handler;
mod heartbeat;
pub mod manager;

pub use handler::{client_ws_handler, worker_ws_handler};
pub use heartbeat::start_heartbeat;
pub use manager::GroupManager;
