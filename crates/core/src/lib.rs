//! Domain building blocks for the live notebook session engine.
//!
//! Everything here is shared by the relay (`livenb-relay`) and the
//! per-session worker process (`livenb-worker`): identifiers, the wire
//! protocol, lease rules, the widget registry, the notebook document
//! model, and the store/capability traits both sides consume.
//!
//! The crate has no internal dependencies so either binary can pull it
//! in without dragging the other's stack along.

pub mod error;
pub mod hashing;
pub mod lease;
pub mod memory;
pub mod notebook;
pub mod protocol;
pub mod storage;
pub mod store;
pub mod types;
pub mod widgets;
pub mod worker_state;
