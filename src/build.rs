//! `localstack build`
//!
//! Resolves upstream versions and runs the staleness decision on the host.
//! Only a required build writes a [`BuildPlan`] into the release directory
//! and launches the container; "no build required" never touches the
//! container runtime.

use chrono::Utc;
use std::path::Path;

use localstack_builder::{
    decide, recorded_versions, FsBlobStore, MetadataSource, VersionResolver,
};
use localstack_model::{layout, BuildConfig, BuildPlan};

use crate::config::ConfigError;
use crate::container::{BUILD_SCRIPT_PATH, RELEASE_MOUNT};
use crate::deploy::{DeployRecord, StateLayout};
use crate::error::LocalstackError;

/// Result of a build command
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    /// Everything recorded matches upstream
    UpToDate,
    /// A container build ran for this plan
    Built(BuildPlan),
}

/// Command exec'd in the container for a plan written to the release dir
pub fn container_command() -> Vec<String> {
    vec![
        "/bin/bash".to_string(),
        BUILD_SCRIPT_PATH.to_string(),
        format!("{}/{}", RELEASE_MOUNT, layout::BUILD_PLAN),
    ]
}

/// Decide and, when required, hand a plan to `launch`.
///
/// `launch` receives the written plan and is responsible for starting the
/// runtime and running [`container_command`].
pub fn build<F>(
    config: &BuildConfig,
    force: bool,
    source: &dyn MetadataSource,
    launch: F,
) -> Result<BuildOutcome, LocalstackError>
where
    F: FnOnce(&BuildPlan) -> Result<(), LocalstackError>,
{
    config.validate()?;
    let state = StateLayout::new(&config.state_dir);
    let record = DeployRecord::load(&state.deploy_record())?;
    if record.device != config.device {
        return Err(ConfigError::ValidationError(format!(
            "stack was deployed for {} but the config names {}; run `localstack deploy` again",
            record.device, config.device
        ))
        .into());
    }

    let latest = VersionResolver::new(source).resolve(config)?;
    let release_dir = state.release_dir();
    let store = FsBlobStore::new(&release_dir);
    let recorded = recorded_versions(&store, &config.device)?;

    let decision = decide(&latest, recorded.as_ref(), force, config.ignore_version_checks);
    if !decision.required {
        tracing::info!("No build is required for {}", config.device);
        return Ok(BuildOutcome::UpToDate);
    }
    for reason in &decision.reasons {
        tracing::info!("Build required: {}", reason);
    }

    let plan = BuildPlan::new(
        ulid::Ulid::new().to_string().to_lowercase(),
        config.device.clone(),
        force,
        latest,
        decision.reasons,
        Utc::now(),
    );
    write_plan(&release_dir, &plan)?;
    launch(&plan)?;
    Ok(BuildOutcome::Built(plan))
}

fn write_plan(release_dir: &Path, plan: &BuildPlan) -> Result<(), LocalstackError> {
    std::fs::create_dir_all(release_dir)?;
    plan.write_to_file(&release_dir.join(layout::BUILD_PLAN))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_command_points_at_release_mount() {
        assert_eq!(
            container_command(),
            vec![
                "/bin/bash",
                "/usr/local/bin/localstack-build.sh",
                "/release/build-plan.json"
            ]
        );
    }
}
