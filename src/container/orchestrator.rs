//! Container lifecycle
//!
//! One disposable container over four persistent volumes:
//! 1. ensure every volume exists (create if absent, never recreate)
//! 2. remove a leftover container with the well-known name
//! 3. create a fresh container, start it and wait until it runs
//! 4. exec the command with stdio attached
//! 5. stop the container and wait until it has stopped

use std::path::{Path, PathBuf};

use super::context::BuildContext;
use super::runtime::{
    BindMount, ContainerRuntime, ContainerSpec, ContainerState, RuntimeError, VolumeMount,
};
use super::{CONTAINER_NAME, IMAGE_TAG, KEEP_ALIVE_COMMAND, RELEASE_MOUNT, VOLUMES};

/// Drives a [`ContainerRuntime`] through the build lifecycle
pub struct Orchestrator<'a> {
    runtime: &'a dyn ContainerRuntime,
    release_dir: PathBuf,
}

impl<'a> Orchestrator<'a> {
    /// `release_dir` is the host directory bind-mounted at `/release`
    pub fn new(runtime: &'a dyn ContainerRuntime, release_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            release_dir: release_dir.into(),
        }
    }

    pub fn release_dir(&self) -> &Path {
        &self.release_dir
    }

    /// Build the image from a materialized context
    pub fn provision(&self, context: &BuildContext) -> Result<(), RuntimeError> {
        tracing::info!("Building image {} from {}", IMAGE_TAG, context.dir.display());
        self.runtime.build_image(&context.dir, IMAGE_TAG)
    }

    /// Container definition every run starts from
    pub fn container_spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: CONTAINER_NAME.to_string(),
            image: IMAGE_TAG.to_string(),
            volumes: VOLUMES
                .iter()
                .map(|(name, dest)| VolumeMount {
                    name: name.to_string(),
                    dest: dest.to_string(),
                })
                .collect(),
            binds: vec![BindMount {
                source: self.release_dir.clone(),
                dest: RELEASE_MOUNT.to_string(),
            }],
            command: KEEP_ALIVE_COMMAND.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Run `command` in a fresh build container
    pub fn run(&self, command: &[String], env: &[(String, String)]) -> Result<(), RuntimeError> {
        for (name, _) in VOLUMES {
            if self.runtime.ensure_volume(name)? {
                tracing::info!("Created volume {}", name);
            }
        }

        if self.runtime.container_exists(CONTAINER_NAME)? {
            tracing::info!("Removing stale container {}", CONTAINER_NAME);
            self.runtime.remove_container(CONTAINER_NAME)?;
        }

        std::fs::create_dir_all(&self.release_dir)?;
        let id = self.runtime.create_container(&self.container_spec())?;
        tracing::info!("Starting container {}", CONTAINER_NAME);
        self.runtime.start(&id)?;
        self.runtime.wait(&id, ContainerState::Running)?;

        let exec = self.runtime.exec_attached(&id, command, env);

        // The keep-alive process never exits on its own
        let stopped = self
            .runtime
            .stop(&id)
            .and_then(|_| self.runtime.wait(&id, ContainerState::Stopped));

        match exec? {
            0 => stopped,
            code => {
                if let Err(e) = stopped {
                    tracing::warn!("Failed to stop container after a failed exec: {}", e);
                }
                Err(RuntimeError::ExecFailed { code })
            }
        }
    }
}
