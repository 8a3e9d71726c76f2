//! livenb relay: the request-serving tier.
//!
//! Browser clients and worker processes attach over WebSocket; the relay
//! fans frames out between the two roles of each (notebook, session) and
//! drives worker spawning from client activity. No notebook code ever runs
//! here.

pub mod config;
pub mod error;
pub mod jobs;
pub mod launcher;
pub mod relay;
pub mod routes;
pub mod spawner;
pub mod state;
pub mod ws;
