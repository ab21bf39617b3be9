//! Cloud control-plane error types

use thiserror::Error;

/// Control-plane and provisioning errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource already exists: {0}")]
    ResourceAlreadyExists(String),

    /// The resource is busy with another operation (e.g. a code update in progress)
    #[error("Resource conflict: {0}")]
    Conflict(String),

    /// The execution role is not yet usable by the function service
    #[error("Role cannot be assumed yet: {0}")]
    RoleNotAssumable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Table {table} key schema differs from the declared one: declared {declared}, found {actual}")]
    SchemaMismatch {
        table: String,
        declared: String,
        actual: String,
    },

    #[error("Remote operation failed: {0}")]
    OperationFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Whether this error only says the resource is already there
    pub fn is_already_exists(&self) -> bool {
        matches!(self, CloudError::ResourceAlreadyExists(_))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
