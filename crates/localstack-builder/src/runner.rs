//! Subprocess seam
//!
//! Every toolchain call (repo, make, git, signing tools) goes through the
//! [`CommandRunner`] trait:
//! - [`SystemRunner`]: spawns real processes, optional wall-clock timeout
//! - [`RecordingRunner`]: records calls, injects failures and side effects

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::retry::RetryPolicy;

/// Poll interval while waiting on a child with a timeout
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Time between SIGTERM and SIGKILL for a timed-out process group
const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// A subprocess invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Bytes written to stdin before waiting
    pub stdin: Option<String>,
    /// Capture stdout instead of inheriting it
    pub capture: bool,
    /// Kill the child after this long
    pub timeout: Option<Duration>,
    /// Exit codes treated as success
    pub ok_codes: Vec<i32>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            stdin: None,
            capture: false,
            timeout: None,
            ok_codes: vec![0],
        }
    }

    /// `bash -c <script>`, for steps that must source the build environment
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("bash").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, data: impl Into<String>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Also accept `code` as success
    pub fn accept_exit(mut self, code: i32) -> Self {
        self.ok_codes.push(code);
        self
    }

    /// Program and arguments joined by spaces
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// Result of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    /// Captured stdout; empty unless the spec asked for capture
    pub stdout: String,
}

/// Subprocess errors
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{command}' exited with {}", describe_exit(.code))]
    Failed { command: String, code: Option<i32> },

    #[error("'{command}' timed out after {}s", seconds(.after))]
    TimedOut { command: String, after: Duration },

    #[error("'{label}' failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        label: String,
        attempts: u32,
        last: Box<RunnerError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {}", c),
        None => "a signal".to_string(),
    }
}

fn seconds(duration: &Duration) -> u64 {
    duration.as_secs()
}

/// Runs subprocesses
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError>;
}

/// Run a command under a retry policy
pub fn run_with_retry(
    runner: &dyn CommandRunner,
    policy: &RetryPolicy,
    spec: &CommandSpec,
) -> Result<CommandOutput, RunnerError> {
    let label = spec.display();
    policy
        .run(&label, |_| runner.run(spec))
        .map_err(|last| RunnerError::RetriesExhausted {
            label,
            attempts: policy.max_attempts.max(1),
            last: Box::new(last),
        })
}

/// Runner that spawns real processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn check(spec: &CommandSpec, code: Option<i32>) -> Result<i32, RunnerError> {
        match code {
            Some(c) if spec.ok_codes.contains(&c) => Ok(c),
            other => Err(RunnerError::Failed {
                command: spec.display(),
                code: other,
            }),
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }
        cmd.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        if spec.capture {
            cmd.stdout(Stdio::piped());
        }
        // Timed commands lead their own group so a timeout reaches every descendant
        #[cfg(unix)]
        if spec.timeout.is_some() && !spec.capture {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        if let (Some(data), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            // The child may exit before reading everything
            if let Err(e) = stdin.write_all(data.as_bytes()) {
                if e.kind() != io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }

        // Captured commands are short queries; timeouts apply to streamed ones.
        if spec.capture {
            let output = child.wait_with_output()?;
            let status = Self::check(spec, output.status.code())?;
            return Ok(CommandOutput {
                status,
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            });
        }

        let status = match spec.timeout {
            None => child.wait()?,
            Some(limit) => {
                let start = Instant::now();
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if start.elapsed() >= limit {
                        tracing::warn!("{} timed out after {:?}", spec.program, limit);
                        terminate_group(&mut child, TERMINATION_GRACE);
                        return Err(RunnerError::TimedOut {
                            command: spec.display(),
                            after: limit,
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };

        Ok(CommandOutput {
            status: Self::check(spec, status.code())?,
            stdout: String::new(),
        })
    }
}

/// Terminate a child's process group gracefully then forcefully
fn terminate_group(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let group = Pid::from_raw(child.id() as i32);
        if let Err(e) = signal::killpg(group, Signal::SIGTERM) {
            tracing::warn!("Failed to send SIGTERM to process group {}: {}", group, e);
        }

        let start = Instant::now();
        while start.elapsed() < grace {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) => thread::sleep(Duration::from_millis(100)),
                Err(e) => {
                    tracing::warn!("Failed to poll timed-out child: {}", e);
                    break;
                }
            }
        }

        // Descendants may outlive the leader, so the group is always killed
        match signal::killpg(group, Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => tracing::warn!("Failed to send SIGKILL to process group {}: {}", group, e),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = grace;
        if let Err(e) = child.kill() {
            tracing::warn!("Failed to kill timed-out child: {}", e);
        }
    }
    if let Err(e) = child.wait() {
        tracing::warn!("Failed to reap timed-out child: {}", e);
    }
}

type Effect = Box<dyn Fn(&CommandSpec) -> io::Result<()> + Send>;

struct FailureRule {
    pattern: String,
    /// Failures left; None fails forever
    remaining: Option<u32>,
}

/// Runner that records invocations without spawning anything.
///
/// Rules match when the command's [`CommandSpec::display`] contains the
/// pattern. Failure rules are checked before effects and canned output.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    failures: Mutex<Vec<FailureRule>>,
    effects: Vec<(String, Effect)>,
    responses: Vec<(String, String)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail matching commands `count` times, then succeed
    pub fn fail_times(self, pattern: impl Into<String>, count: u32) -> Self {
        self.push_failure(pattern.into(), Some(count));
        self
    }

    /// Fail matching commands every time
    pub fn fail_always(self, pattern: impl Into<String>) -> Self {
        self.push_failure(pattern.into(), None);
        self
    }

    /// Run `effect` whenever a matching command succeeds
    pub fn on<F>(mut self, pattern: impl Into<String>, effect: F) -> Self
    where
        F: Fn(&CommandSpec) -> io::Result<()> + Send + 'static,
    {
        self.effects.push((pattern.into(), Box::new(effect)));
        self
    }

    /// Return `stdout` from matching captured commands
    pub fn respond(mut self, pattern: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.responses.push((pattern.into(), stdout.into()));
        self
    }

    fn push_failure(&self, pattern: String, remaining: Option<u32>) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(FailureRule { pattern, remaining });
        }
    }

    /// Every recorded invocation, in order
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Displayed form of every recorded invocation
    pub fn commands(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::display).collect()
    }

    /// Index of the first call containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(pattern))
    }

    /// Number of calls containing `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(pattern)).count()
    }

    fn should_fail(&self, line: &str) -> bool {
        let Ok(mut failures) = self.failures.lock() else {
            return false;
        };
        for rule in failures.iter_mut() {
            if !line.contains(&rule.pattern) {
                continue;
            }
            match rule.remaining {
                None => return true,
                Some(0) => {}
                Some(n) => {
                    rule.remaining = Some(n - 1);
                    return true;
                }
            }
        }
        false
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }
        let line = spec.display();

        if self.should_fail(&line) {
            return Err(RunnerError::Failed {
                command: line,
                code: Some(1),
            });
        }

        for (pattern, effect) in &self.effects {
            if line.contains(pattern.as_str()) {
                effect(spec)?;
            }
        }

        let stdout = if spec.capture {
            self.responses
                .iter()
                .find(|(pattern, _)| line.contains(pattern.as_str()))
                .map(|(_, out)| out.clone())
                .unwrap_or_default()
        } else {
            String::new()
        };

        Ok(CommandOutput { status: 0, stdout })
    }
}
