//! Podman adapter
//!
//! Drives the `podman` CLI in remote mode against the service socket
//! started by [`super::RuntimeDaemon`]. Every call goes through a
//! [`CommandRunner`] so the exact invocations can be asserted in tests.

use std::path::Path;

use localstack_builder::runner::RunnerError;
use localstack_builder::{CommandRunner, CommandSpec};

use super::runtime::{ContainerRuntime, ContainerSpec, ContainerState, RuntimeError};

/// `podman --url <socket> ...`
pub struct PodmanRuntime<'a> {
    runner: &'a dyn CommandRunner,
    url: String,
}

impl<'a> PodmanRuntime<'a> {
    pub fn new(runner: &'a dyn CommandRunner, socket: &Path) -> Self {
        Self {
            runner,
            url: format!("unix://{}", socket.display()),
        }
    }

    fn podman(&self) -> CommandSpec {
        CommandSpec::new("podman").args(["--url", self.url.as_str()])
    }

    fn run(&self, spec: &CommandSpec) -> Result<i32, RuntimeError> {
        self.runner
            .run(spec)
            .map(|out| out.status)
            .map_err(|e| command_error(spec, e))
    }

    /// `exists` subcommands answer with exit status 0 or 1
    fn exists(&self, spec: CommandSpec) -> Result<bool, RuntimeError> {
        let spec = spec.accept_exit(1).capture();
        match self.runner.run(&spec) {
            Ok(out) => Ok(out.status == 0),
            Err(RunnerError::Failed { code: Some(1), .. }) => Ok(false),
            Err(e) => Err(command_error(&spec, e)),
        }
    }
}

fn command_error(spec: &CommandSpec, error: RunnerError) -> RuntimeError {
    match error {
        RunnerError::Spawn { .. } => RuntimeError::Unreachable(error.to_string()),
        other => RuntimeError::Command {
            command: spec.display(),
            message: other.to_string(),
        },
    }
}

impl ContainerRuntime for PodmanRuntime<'_> {
    fn ensure_volume(&self, name: &str) -> Result<bool, RuntimeError> {
        if self.exists(self.podman().args(["volume", "exists", name]))? {
            return Ok(false);
        }
        self.run(&self.podman().args(["volume", "create", name]).capture())?;
        Ok(true)
    }

    fn container_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        self.exists(self.podman().args(["container", "exists", name]))
    }

    fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        self.run(&self.podman().args(["rm", "--force", name]).capture())?;
        Ok(())
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut cmd = self
            .podman()
            .args(["create", "--tty", "--name", spec.name.as_str()]);
        for volume in &spec.volumes {
            cmd = cmd.arg("--volume").arg(format!("{}:{}", volume.name, volume.dest));
        }
        for bind in &spec.binds {
            cmd = cmd.arg("--mount").arg(format!(
                "type=bind,source={},destination={}",
                bind.source.display(),
                bind.dest
            ));
        }
        cmd = cmd.arg(spec.image.as_str()).args(spec.command.iter().cloned()).capture();

        let out = self.runner.run(&cmd).map_err(|e| command_error(&cmd, e))?;
        let id = out.stdout.trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::Command {
                command: cmd.display(),
                message: "no container id returned".to_string(),
            });
        }
        Ok(id)
    }

    fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.run(&self.podman().args(["start", id]).capture())?;
        Ok(())
    }

    fn wait(&self, id: &str, state: ContainerState) -> Result<(), RuntimeError> {
        self.run(
            &self
                .podman()
                .args(["wait", "--condition", state.as_str(), id])
                .capture(),
        )?;
        Ok(())
    }

    fn exec_attached(
        &self,
        id: &str,
        command: &[String],
        env: &[(String, String)],
    ) -> Result<i32, RuntimeError> {
        let mut cmd = self.podman().args(["exec", "--interactive", "--tty"]);
        for (key, value) in env {
            cmd = cmd.arg("--env").arg(format!("{}={}", key, value));
        }
        cmd = cmd.arg(id).args(command.iter().cloned());

        match self.runner.run(&cmd) {
            Ok(out) => Ok(out.status),
            Err(RunnerError::Failed { code: Some(code), .. }) => Ok(code),
            Err(e) => Err(command_error(&cmd, e)),
        }
    }

    fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.run(&self.podman().args(["stop", id]).capture())?;
        Ok(())
    }

    fn build_image(&self, context: &Path, tag: &str) -> Result<(), RuntimeError> {
        let dockerfile = context.join("Dockerfile");
        self.run(
            &self
                .podman()
                .args(["build", "--layers", "--pull=newer", "--tag", tag, "--file"])
                .arg(dockerfile.to_string_lossy())
                .arg(context.to_string_lossy()),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::runtime::{BindMount, VolumeMount};
    use localstack_builder::RecordingRunner;
    use std::path::PathBuf;

    const SOCKET: &str = "/tmp/localstack.sock";

    #[test]
    fn test_volume_created_only_when_missing() {
        let runner = RecordingRunner::new().fail_always("volume exists localstack-keys");
        let podman = PodmanRuntime::new(&runner, Path::new(SOCKET));

        assert!(!podman.ensure_volume("localstack-build").unwrap());
        assert_eq!(runner.count("volume create"), 0);

        assert!(podman.ensure_volume("localstack-keys").unwrap());
        assert_eq!(runner.count("volume create localstack-keys"), 1);
    }

    #[test]
    fn test_create_container_arguments() {
        let runner = RecordingRunner::new().respond("podman --url unix:///tmp/localstack.sock create", "abc123\n");
        let podman = PodmanRuntime::new(&runner, Path::new(SOCKET));
        let spec = ContainerSpec {
            name: "localstack-build".to_string(),
            image: "localstack-build-image".to_string(),
            volumes: vec![VolumeMount {
                name: "localstack-build".to_string(),
                dest: "/build".to_string(),
            }],
            binds: vec![BindMount {
                source: PathBuf::from("/home/u/.localstack/mounts/release"),
                dest: "/release".to_string(),
            }],
            command: vec!["sleep".to_string(), "infinity".to_string()],
        };

        assert_eq!(podman.create_container(&spec).unwrap(), "abc123");
        let commands = runner.commands();
        assert_eq!(
            commands[0],
            "podman --url unix:///tmp/localstack.sock create --tty --name localstack-build \
             --volume localstack-build:/build \
             --mount type=bind,source=/home/u/.localstack/mounts/release,destination=/release \
             localstack-build-image sleep infinity"
        );
    }

    #[test]
    fn test_exec_returns_exit_code() {
        let runner = RecordingRunner::new().fail_always("exec");
        let podman = PodmanRuntime::new(&runner, Path::new(SOCKET));
        let code = podman
            .exec_attached("abc123", &["true".to_string()], &[])
            .unwrap();
        assert_ne!(code, 0);
    }
}
