//! In-memory container runtime for tests
//!
//! Tracks volumes and containers the way the engine would and records every
//! call in order.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use super::runtime::{ContainerRuntime, ContainerSpec, ContainerState, RuntimeError};

/// A recorded runtime call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    EnsureVolume(String),
    CreateVolume(String),
    ContainerExists(String),
    RemoveContainer(String),
    CreateContainer(ContainerSpec),
    Start(String),
    Wait(String, ContainerState),
    Exec(String, Vec<String>),
    Stop(String),
    BuildImage(String),
}

#[derive(Default)]
struct MockState {
    volumes: BTreeSet<String>,
    containers: BTreeSet<String>,
    calls: Vec<RuntimeCall>,
    next_id: u32,
}

/// Mock runtime
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
    exec_exit_code: i32,
    unreachable: bool,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend these volumes already exist
    pub fn with_volumes(self, names: &[&str]) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.volumes.extend(names.iter().map(|n| n.to_string()));
        }
        self
    }

    /// Pretend a container with this name is left over from an earlier run
    pub fn with_container(self, name: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.containers.insert(name.to_string());
        }
        self
    }

    /// Exit code returned by every exec
    pub fn with_exec_exit_code(mut self, code: i32) -> Self {
        self.exec_exit_code = code;
        self
    }

    /// Fail every call as if the daemon were down
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn volumes(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.volumes.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn containers(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.containers.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn record<T>(
        &self,
        call: RuntimeCall,
        f: impl FnOnce(&mut MockState) -> T,
    ) -> Result<T, RuntimeError> {
        if self.unreachable {
            return Err(RuntimeError::Unreachable("mock runtime is down".to_string()));
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| RuntimeError::Unreachable("mock state poisoned".to_string()))?;
        state.calls.push(call);
        Ok(f(&mut state))
    }
}

impl ContainerRuntime for MockRuntime {
    fn ensure_volume(&self, name: &str) -> Result<bool, RuntimeError> {
        self.record(RuntimeCall::EnsureVolume(name.to_string()), |s| {
            let created = s.volumes.insert(name.to_string());
            if created {
                s.calls.push(RuntimeCall::CreateVolume(name.to_string()));
            }
            created
        })
    }

    fn container_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        self.record(RuntimeCall::ContainerExists(name.to_string()), |s| {
            s.containers.contains(name)
        })
    }

    fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::RemoveContainer(name.to_string()), |s| {
            s.containers.remove(name);
        })
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let result = self.record(RuntimeCall::CreateContainer(spec.clone()), |s| {
            if s.containers.contains(&spec.name) {
                return None;
            }
            s.containers.insert(spec.name.clone());
            s.next_id += 1;
            Some(format!("mock-{}", s.next_id))
        })?;
        result.ok_or_else(|| RuntimeError::Command {
            command: "create".to_string(),
            message: format!("container name {} is already in use", spec.name),
        })
    }

    fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Start(id.to_string()), |_| ())
    }

    fn wait(&self, id: &str, state: ContainerState) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Wait(id.to_string(), state), |_| ())
    }

    fn exec_attached(
        &self,
        id: &str,
        command: &[String],
        _env: &[(String, String)],
    ) -> Result<i32, RuntimeError> {
        let code = self.exec_exit_code;
        self.record(RuntimeCall::Exec(id.to_string(), command.to_vec()), |_| code)
    }

    fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Stop(id.to_string()), |_| ())
    }

    fn build_image(&self, _context: &Path, tag: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::BuildImage(tag.to_string()), |_| ())
    }
}
