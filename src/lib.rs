//! localstack - containerized build orchestrator for custom Android images
//!
//! Host side of the workspace: layered configuration, the `deploy` and
//! `build` commands and the container orchestration they drive. The build
//! itself runs in `localstack-builder` inside the container.

pub mod build;
pub mod config;
pub mod container;
pub mod deploy;
pub mod error;

pub use build::{build, container_command, BuildOutcome};
pub use config::{ConfigError, EffectiveConfig};
pub use container::{ContainerRuntime, MockRuntime, Orchestrator, PodmanRuntime, RuntimeDaemon};
pub use deploy::{deploy, DeployOptions, DeployRecord, StateLayout};
pub use error::LocalstackError;
