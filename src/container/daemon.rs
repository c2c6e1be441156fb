//! Runtime service process
//!
//! `podman system service` is started in the background for the lifetime of
//! one command and stopped with SIGTERM afterwards. When the socket accepts
//! connections an earlier service is reused and left running. A socket file
//! left behind by a dead service is removed before starting a new one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::runtime::RuntimeError;

/// How long to wait for the socket to appear
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

const SOCKET_POLL: Duration = Duration::from_secs(1);

/// Handle to the background runtime service
pub struct RuntimeDaemon {
    socket: PathBuf,
    child: Option<Child>,
}

impl RuntimeDaemon {
    /// Start the service (or reuse a live socket) and block until ready
    pub fn start(socket: &Path) -> Result<Self, RuntimeError> {
        if socket_ready(socket) {
            tracing::debug!("Reusing runtime socket {}", socket.display());
            return Ok(Self {
                socket: socket.to_path_buf(),
                child: None,
            });
        }
        remove_stale_socket(socket)?;

        tracing::info!("Starting podman service on {}", socket.display());
        let child = Command::new("podman")
            .args(["system", "service", "--time", "0"])
            .arg(format!("unix://{}", socket.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| RuntimeError::Unreachable(format!("failed to start podman service: {}", e)))?;

        let mut daemon = Self {
            socket: socket.to_path_buf(),
            child: Some(child),
        };
        if let Err(e) = wait_for_socket(socket, SOCKET_TIMEOUT, SOCKET_POLL) {
            daemon.terminate();
            return Err(e);
        }
        Ok(daemon)
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Stop the service if this handle started it
    pub fn shutdown(mut self) {
        self.terminate();
    }

    fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(child.id() as i32);
            if let Err(e) = signal::kill(pid, Signal::SIGTERM) {
                tracing::warn!("Failed to signal podman service: {}", e);
                let _ = child.kill();
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.kill();
        }
        match child.wait() {
            Ok(status) => tracing::debug!("podman service exited with {}", status),
            Err(e) => tracing::warn!("Failed to wait for podman service: {}", e),
        }
    }
}

impl Drop for RuntimeDaemon {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Whether a service is accepting connections on `socket`
#[cfg(unix)]
pub fn socket_ready(socket: &Path) -> bool {
    std::os::unix::net::UnixStream::connect(socket).is_ok()
}

#[cfg(not(unix))]
pub fn socket_ready(socket: &Path) -> bool {
    socket.exists()
}

/// Remove a socket file nothing is listening on
fn remove_stale_socket(socket: &Path) -> Result<(), RuntimeError> {
    match fs::remove_file(socket) {
        Ok(()) => {
            tracing::warn!("Removed stale runtime socket {}", socket.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RuntimeError::Unreachable(format!(
            "failed to remove stale socket {}: {}",
            socket.display(),
            e
        ))),
    }
}

/// Poll until `socket` accepts connections or `timeout` elapses
pub fn wait_for_socket(socket: &Path, timeout: Duration, poll: Duration) -> Result<(), RuntimeError> {
    let start = Instant::now();
    loop {
        if socket_ready(socket) {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(RuntimeError::Unreachable(format!(
                "socket {} not ready within {}s",
                socket.display(),
                timeout.as_secs()
            )));
        }
        thread::sleep(poll);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    #[test]
    fn test_wait_for_listening_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("podman.sock");
        let _listener = UnixListener::bind(&socket).unwrap();
        assert!(wait_for_socket(&socket, Duration::from_millis(10), Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_wait_for_socket_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let err = wait_for_socket(
            &dir.path().join("absent.sock"),
            Duration::from_millis(20),
            Duration::from_millis(5),
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::Unreachable(_)));
    }

    #[test]
    fn test_wait_rejects_dead_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("podman.sock");
        drop(UnixListener::bind(&socket).unwrap());
        assert!(socket.exists());
        assert!(!socket_ready(&socket));
        assert!(wait_for_socket(&socket, Duration::from_millis(20), Duration::from_millis(5)).is_err());
    }

    #[test]
    fn test_listening_socket_is_reused_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("podman.sock");
        let _listener = UnixListener::bind(&socket).unwrap();
        let daemon = RuntimeDaemon::start(&socket).unwrap();
        assert_eq!(daemon.socket(), socket.as_path());
        assert!(daemon.child.is_none());
        daemon.shutdown();
        assert!(socket_ready(&socket));
    }

    #[test]
    fn test_stale_socket_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("podman.sock");
        drop(UnixListener::bind(&socket).unwrap());

        remove_stale_socket(&socket).unwrap();
        assert!(!socket.exists());
        // already gone
        remove_stale_socket(&socket).unwrap();
    }
}
