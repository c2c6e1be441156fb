//! Top-level error for a build run
//!
//! Wraps the per-module errors and maps each failure class to a stable
//! process exit code.

use localstack_model::ModelError;

use crate::customize::CustomizeError;
use crate::executor::StageError;
use crate::keys::KeyError;
use crate::publish::PublishError;
use crate::resolve::ResolveError;
use crate::runner::RunnerError;
use crate::store::StoreError;

/// Exit code for usage and configuration errors
pub const EXIT_CONFIG: i32 = 1;
/// Exit code for prerequisite failures (metadata, missing inputs)
pub const EXIT_PREREQUISITE: i32 = 10;
/// Exit code for container/runtime failures
pub const EXIT_ENVIRONMENT: i32 = 20;
/// Exit code when retries are exhausted
pub const EXIT_TRANSIENT: i32 = 30;
/// Exit code for key or checkpoint corruption risks
pub const EXIT_STATE: i32 = 40;
/// Exit code for wall-clock timeouts
pub const EXIT_TIMEOUT: i32 = 50;
/// Exit code for a failed build stage
pub const EXIT_STAGE: i32 = 60;
/// Exit code for publish failures
pub const EXIT_PUBLISH: i32 = 70;

/// Errors that abort a build run
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("configuration error: {0}")]
    Model(#[from] ModelError),

    #[error("version resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("key management failed: {0}")]
    Keys(#[from] KeyError),

    #[error("customization failed: {0}")]
    Customize(#[from] CustomizeError),

    #[error("stage failed: {0}")]
    Stage(#[from] StageError),

    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("release store error: {0}")]
    Store(#[from] StoreError),

    #[error("plan is for device {plan} but config is for {config}")]
    DeviceMismatch { plan: String, config: String },
}

impl BuildError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::Model(_) | BuildError::DeviceMismatch { .. } => EXIT_CONFIG,
            BuildError::Resolve(ResolveError::Exhausted { .. }) => EXIT_TRANSIENT,
            BuildError::Resolve(_) => EXIT_PREREQUISITE,
            BuildError::Keys(_) => EXIT_STATE,
            BuildError::Customize(e) => runner_exit_code(e.runner_error()),
            BuildError::Stage(e) => match e {
                StageError::Keys(_) => EXIT_STATE,
                StageError::Customize(c) => runner_exit_code(c.runner_error()),
                StageError::Publish(_) => EXIT_PUBLISH,
                StageError::Store(_) | StageError::MissingState { .. } => EXIT_STATE,
                other => runner_exit_code(other.runner_error()),
            },
            BuildError::Publish(_) => EXIT_PUBLISH,
            BuildError::Store(_) => EXIT_STATE,
        }
    }
}

fn runner_exit_code(error: Option<&RunnerError>) -> i32 {
    match error {
        Some(RunnerError::TimedOut { .. }) => EXIT_TIMEOUT,
        Some(RunnerError::RetriesExhausted { .. }) => EXIT_TRANSIENT,
        _ => EXIT_STAGE,
    }
}
