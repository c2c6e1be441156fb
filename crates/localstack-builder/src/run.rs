//! One build run inside the container
//!
//! Threads a [`BuildRunState`] through the stage list. The first failing
//! stage stops the run; the failure is reported once, followed by a
//! best-effort snapshot of disk and load.

use std::path::Path;

use localstack_model::{BuildConfig, BuildPlan, DeviceProfile};

use crate::error::BuildError;
use crate::executor::{stages_for, BuildStage, Executor};
use crate::keys::KeyBundle;
use crate::publish::BuildArtifactSet;
use crate::runner::{CommandRunner, CommandSpec};

/// Mutable state of a run
#[derive(Debug, Clone)]
pub struct BuildRunState {
    /// Plan handed over by the host
    pub plan: BuildPlan,

    pub profile: DeviceProfile,

    /// `YYYY.MM.DD.HH`, fixed for the whole run
    pub build_number: String,

    /// Set by the keys stage
    pub keys: Option<KeyBundle>,

    /// Set by the signing stage
    pub artifacts: Option<BuildArtifactSet>,

    pub current_stage: Option<BuildStage>,

    pub completed: Vec<BuildStage>,
}

impl BuildRunState {
    pub fn new(plan: BuildPlan, profile: DeviceProfile) -> Self {
        let build_number = plan.build_number();
        Self {
            plan,
            profile,
            build_number,
            keys: None,
            artifacts: None,
            current_stage: None,
            completed: Vec::new(),
        }
    }
}

/// Run every stage for the plan's device
pub fn run_build(
    plan: BuildPlan,
    config: &BuildConfig,
    executor: &Executor<'_>,
    runner: &dyn CommandRunner,
) -> Result<BuildRunState, BuildError> {
    config.validate()?;
    if plan.device != config.device {
        return Err(BuildError::DeviceMismatch {
            plan: plan.device,
            config: config.device.clone(),
        });
    }

    let profile = config.profile();
    if !profile.known {
        tracing::warn!(
            "Device {} is not in the catalog; building with the default profile",
            profile.codename
        );
    }

    let stages = stages_for(&profile);
    let mut state = BuildRunState::new(plan, profile);
    tracing::info!(
        "Build STARTED for {} ({}): {}",
        state.profile.codename,
        state.build_number,
        state.plan.reasons.join(", ")
    );

    for stage in stages {
        if let Err(e) = executor.execute(stage, &mut state) {
            let error = BuildError::Stage(e);
            tracing::error!("Build FAILED in {}: {}", stage, error);
            collect_diagnostics(runner, &executor.workspace().tree);
            return Err(error);
        }
        state.completed.push(stage);
    }
    state.current_stage = None;

    tracing::info!("Build SUCCESS for {} ({})", state.profile.codename, state.build_number);
    Ok(state)
}

/// Log disk usage, tree size and load; errors are ignored
pub fn collect_diagnostics(runner: &dyn CommandRunner, tree: &Path) {
    let commands = [
        CommandSpec::new("df").arg("-h"),
        CommandSpec::new("du").arg("-chs").arg(tree.to_string_lossy()),
        CommandSpec::new("uptime"),
    ];
    for spec in commands {
        let spec = spec.capture();
        match runner.run(&spec) {
            Ok(out) => tracing::info!("{}\n{}", spec.display(), out.stdout.trim_end()),
            Err(e) => tracing::warn!("Diagnostics command failed: {}", e),
        }
    }
}
