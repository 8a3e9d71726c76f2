use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// An external collaborator (store, storage, converter) failed.
    #[error("Capability '{capability}' failed: {message}")]
    Capability {
        capability: &'static str,
        message: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for wrapping a collaborator failure.
    pub fn capability(capability: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Capability {
            capability,
            message: err.to_string(),
        }
    }
}
