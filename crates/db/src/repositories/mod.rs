//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod notebook_repo;
pub mod usage_repo;
pub mod worker_repo;
pub mod worker_session_repo;

pub use notebook_repo::NotebookRepo;
pub use usage_repo::UsageRepo;
pub use worker_repo::WorkerRepo;
pub use worker_session_repo::WorkerSessionRepo;
