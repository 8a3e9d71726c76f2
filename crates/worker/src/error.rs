use livenb_core::error::CoreError;
use livenb_core::types::DbId;

/// Errors raised inside a worker process.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Failed to establish the relay WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The kernel process failed or replied with something unreadable.
    #[error("Kernel error: {0}")]
    Kernel(String),

    /// This process's lease no longer exists.
    #[error("Lease {0} is gone")]
    LeaseLost(DbId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
