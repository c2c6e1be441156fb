//! Container runtime capability
//!
//! The orchestrator only needs a narrow slice of a container engine; this
//! trait is that slice. [`super::PodmanRuntime`] drives the real engine,
//! [`super::MockRuntime`] records calls for tests.

use std::path::{Path, PathBuf};

/// Named volume mounted into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub name: String,
    pub dest: String,
}

/// Host directory bind-mounted into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub dest: String,
}

/// Everything needed to create the build container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub volumes: Vec<VolumeMount>,
    pub binds: Vec<BindMount>,
    /// Main process; kept idle while commands are exec'd
    pub command: Vec<String>,
}

/// States the orchestrator waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Running => "running",
            ContainerState::Stopped => "stopped",
        }
    }
}

/// Runtime errors
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("container runtime unreachable: {0}")]
    Unreachable(String),

    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("command in container exited with status {code}")]
    ExecFailed { code: i32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Narrow container engine interface
pub trait ContainerRuntime {
    /// Create the volume if absent. Returns true when it was created.
    fn ensure_volume(&self, name: &str) -> Result<bool, RuntimeError>;

    fn container_exists(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Remove a container; its named volumes are kept
    fn remove_container(&self, name: &str) -> Result<(), RuntimeError>;

    /// Create a container and return its id
    fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    fn start(&self, id: &str) -> Result<(), RuntimeError>;

    fn wait(&self, id: &str, state: ContainerState) -> Result<(), RuntimeError>;

    /// Run a command with stdio attached and return its exit code
    fn exec_attached(
        &self,
        id: &str,
        command: &[String],
        env: &[(String, String)],
    ) -> Result<i32, RuntimeError>;

    fn stop(&self, id: &str) -> Result<(), RuntimeError>;

    /// Build an image from a context directory with layer caching
    fn build_image(&self, context: &Path, tag: &str) -> Result<(), RuntimeError>;
}
