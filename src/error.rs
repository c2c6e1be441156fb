//! Host-side top-level error
//!
//! Same exit code table as the in-container builder.

use std::path::PathBuf;

use localstack_builder::error::{
    EXIT_CONFIG, EXIT_ENVIRONMENT, EXIT_PREREQUISITE, EXIT_STATE, EXIT_TRANSIENT,
};
use localstack_builder::resolve::ResolveError;
use localstack_builder::store::StoreError;
use localstack_model::ModelError;

use crate::config::ConfigError;
use crate::container::{ContextError, RuntimeError};

/// Errors that abort a host command
#[derive(Debug, thiserror::Error)]
pub enum LocalstackError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("configuration error: {0}")]
    Model(#[from] ModelError),

    #[error("unsupported device '{device}'; supported devices: {supported}")]
    UnsupportedDevice { device: String, supported: String },

    #[error("stack is not deployed: no deploy record at {0:?}; run `localstack deploy` first")]
    NotDeployed(PathBuf),

    #[error("version resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("release store error: {0}")]
    Store(#[from] StoreError),

    #[error("container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("build context error: {0}")]
    Context(#[from] ContextError),

    #[error("aborted by user")]
    Aborted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LocalstackError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            LocalstackError::Config(_)
            | LocalstackError::Model(_)
            | LocalstackError::UnsupportedDevice { .. }
            | LocalstackError::Aborted => EXIT_CONFIG,
            LocalstackError::NotDeployed(_) => EXIT_PREREQUISITE,
            LocalstackError::Resolve(ResolveError::Exhausted { .. }) => EXIT_TRANSIENT,
            LocalstackError::Resolve(_) => EXIT_PREREQUISITE,
            LocalstackError::Store(_) => EXIT_STATE,
            LocalstackError::Context(ContextError::MissingBuilder(_)) => EXIT_PREREQUISITE,
            LocalstackError::Runtime(_) | LocalstackError::Context(_) | LocalstackError::Io(_) => {
                EXIT_ENVIRONMENT
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(LocalstackError::NotDeployed(PathBuf::from("/x")).exit_code(), 10);
        assert_eq!(
            LocalstackError::Runtime(RuntimeError::ExecFailed { code: 60 }).exit_code(),
            20
        );
        assert_eq!(LocalstackError::Config(ConfigError::MissingDevice).exit_code(), 1);
        assert_eq!(
            LocalstackError::Resolve(ResolveError::Missing {
                what: "chromium version".to_string(),
                url: "https://omahaproxy.appspot.com/all.json".to_string(),
            })
            .exit_code(),
            10
        );
    }
}
