//! Row structs and insert DTOs.

pub mod notebook;
pub mod worker;
pub mod worker_session;
