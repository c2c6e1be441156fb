//! Model-level errors

/// Errors raised while validating or (de)serializing model records
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid chromium version '{version}': {reason}")]
    InvalidChromiumVersion { version: String, reason: String },

    #[error("unsupported schema {found}, expected {expected}")]
    SchemaMismatch { expected: String, found: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
