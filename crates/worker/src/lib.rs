//! livenb worker: one process per live (notebook, session).
//!
//! The worker claims the lease the relay queued for it, connects back to
//! the relay, and executes the notebook in a kernel subprocess. Widget
//! changes re-run only the cells from the first affected one onward.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod kernel;
pub mod lease;
pub mod local_store;
pub mod reconnect;
pub mod render;
pub mod session;
pub mod watch;
