//! `localstack deploy`
//!
//! Validates the configuration, renders the image build context and builds
//! the image. A successful deploy leaves a [`DeployRecord`] in the state
//! directory; `build` refuses to run without one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use localstack_model::{BuildConfig, DeviceProfile, SUPPORTED_DEVICES};

use crate::config::EffectiveConfig;
use crate::container::{BuildContext, ContainerRuntime, Orchestrator, IMAGE_TAG};
use crate::error::LocalstackError;

/// Schema version for deploy.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "localstack/deploy@1";

/// Files and directories under `<state_dir>/.localstack`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    pub root: PathBuf,
}

impl StateLayout {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            root: state_dir.join(".localstack"),
        }
    }

    /// Image build context
    pub fn context_dir(&self) -> PathBuf {
        self.root.join("build-ubuntu")
    }

    /// Host side of the `/release` bind mount; also the release store root
    pub fn release_dir(&self) -> PathBuf {
        self.root.join("mounts/release")
    }

    pub fn deploy_record(&self) -> PathBuf {
        self.root.join("deploy.json")
    }

    pub fn effective_config(&self) -> PathBuf {
        self.root.join("effective_config.json")
    }
}

/// Proof of a successful deploy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRecord {
    pub schema_version: u32,

    pub schema_id: String,

    /// Deploy identifier (lowercase ULID)
    pub deploy_id: String,

    pub created_at: DateTime<Utc>,

    pub device: String,

    pub stack_version: String,

    /// Image built from the context
    pub image: String,

    /// Digest of the build context
    pub context_digest: String,
}

impl DeployRecord {
    pub fn new(config: &BuildConfig, context_digest: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            deploy_id: ulid::Ulid::new().to_string().to_lowercase(),
            created_at: Utc::now(),
            device: config.device.clone(),
            stack_version: config.stack_version.clone(),
            image: IMAGE_TAG.to_string(),
            context_digest: context_digest.into(),
        }
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), LocalstackError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(localstack_model::ModelError::from)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load the record, failing with `NotDeployed` when it is absent
    pub fn load(path: &Path) -> Result<Self, LocalstackError> {
        if !path.is_file() {
            return Err(LocalstackError::NotDeployed(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let record: Self =
            serde_json::from_str(&content).map_err(localstack_model::ModelError::from)?;
        if record.schema_id != SCHEMA_ID {
            return Err(localstack_model::ModelError::SchemaMismatch {
                expected: SCHEMA_ID.to_string(),
                found: record.schema_id,
            }
            .into());
        }
        Ok(record)
    }
}

/// `sailfish (Pixel), marlin (Pixel XL), ...`
pub fn supported_devices_output() -> String {
    SUPPORTED_DEVICES
        .iter()
        .map(|(codename, name)| format!("{} ({})", codename, name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Reject devices outside the catalog; warn about deprecated ones
pub fn check_device(device: &str) -> Result<DeviceProfile, LocalstackError> {
    if !DeviceProfile::is_supported(device) {
        return Err(LocalstackError::UnsupportedDevice {
            device: device.to_string(),
            supported: SUPPORTED_DEVICES
                .iter()
                .map(|(codename, _)| *codename)
                .collect::<Vec<_>>()
                .join(", "),
        });
    }
    let profile = DeviceProfile::resolve(device);
    if profile.is_deprecated() {
        tracing::warn!(
            "{} devices are no longer receiving security updates and will likely be dropped in the future",
            device
        );
    }
    Ok(profile)
}

/// Warn once per custom repository outside the trusted base
pub fn warn_untrusted_repos(config: &BuildConfig) {
    for (kind, repo) in config.untrusted_repos() {
        tracing::warn!(
            "You are using an untrusted repository ({}) for {}; this is risky unless you own the repository",
            repo,
            kind
        );
    }
}

/// Deploy options
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Write the merged config back to this file
    pub save_config: Option<PathBuf>,
    /// Pass `--verbose` to the builder
    pub verbose: bool,
}

/// Validate, render the context, build the image and record the deploy.
///
/// `confirm` is asked once with the validated config; a false answer
/// aborts before anything is written.
pub fn deploy<F>(
    effective: &EffectiveConfig,
    runtime: &dyn ContainerRuntime,
    builder_binary: &Path,
    options: &DeployOptions,
    confirm: F,
) -> Result<DeployRecord, LocalstackError>
where
    F: FnOnce(&BuildConfig) -> bool,
{
    let config = effective.to_build_config()?;
    check_device(&config.device)?;
    warn_untrusted_repos(&config);

    if let Some(path) = &options.save_config {
        tracing::info!("These settings will be saved to config file {}", path.display());
    }
    if !confirm(&config) {
        return Err(LocalstackError::Aborted);
    }

    let layout = StateLayout::new(&config.state_dir);
    fs::create_dir_all(layout.release_dir())?;
    let context = BuildContext::materialize(
        &layout.context_dir(),
        &config,
        builder_binary,
        options.verbose,
    )?;
    Orchestrator::new(runtime, layout.release_dir()).provision(&context)?;

    effective.write_to_file(&layout.effective_config())?;
    let record = DeployRecord::new(&config, context.digest);
    record.write_to_file(&layout.deploy_record())?;
    tracing::info!(
        "Deployed {} for {} (context {})",
        record.image,
        record.device,
        record.context_digest
    );

    if let Some(path) = &options.save_config {
        effective.save_toml(path)?;
        tracing::info!("Saved settings to config file {}", path.display());
    }
    Ok(record)
}
