//! Immutable build configuration
//!
//! `BuildConfig` is assembled once on the host from the layered config,
//! validated, rendered into the image build context as JSON and read back
//! by the in-container builder. Nothing mutates it after construction.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::device::DeviceProfile;
use crate::error::ModelError;

/// Lowest chromium major version the build scripts support
pub const MINIMUM_CHROMIUM_MAJOR: u32 = 80;

/// Custom repositories outside this base trigger a warning
pub const TRUSTED_REPO_BASE: &str = "https://github.com/gnu3ra/localstack";

/// Schema version for build-config.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "localstack/build_config@1";

/// A repository of patch files applied with `patch -p1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomPatchSet {
    pub repo: String,
    #[serde(default)]
    pub patches: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// A repository of shell scripts run inside the source tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomScriptSet {
    pub repo: String,
    #[serde(default)]
    pub scripts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// A repository of prebuilt modules dropped into `packages/apps/Custom`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomPrebuilt {
    pub repo: String,
    #[serde(default)]
    pub modules: Vec<String>,
}

/// Extra `<remote>` entry in the local manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRemote {
    pub name: String,
    pub fetch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// Extra `<project>` entry in the local manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestProject {
    pub path: String,
    pub name: String,
    pub remote: String,
    /// Modules registered in the product package list
    #[serde(default)]
    pub modules: Vec<String>,
}

/// Per-run build configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Schema version
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Schema identifier
    #[serde(default = "default_schema_id")]
    pub schema_id: String,

    /// Stack name, used for display and image labels
    pub name: String,

    /// Target device codename
    pub device: String,

    /// Version of the running stack, checkpointed after each build
    pub stack_version: String,

    /// Skip staleness checks and always build
    #[serde(default)]
    pub ignore_version_checks: bool,

    /// Pinned chromium version; latest stable is used when None
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chromium_version: Option<String>,

    /// URL of a replacement hosts file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts_file: Option<String>,

    /// Include the Auditor attestation app
    #[serde(default)]
    pub enable_attestation: bool,

    #[serde(default)]
    pub custom_manifest_remotes: Vec<ManifestRemote>,

    #[serde(default)]
    pub custom_manifest_projects: Vec<ManifestProject>,

    #[serde(default)]
    pub custom_patches: Vec<CustomPatchSet>,

    #[serde(default)]
    pub custom_scripts: Vec<CustomScriptSet>,

    #[serde(default)]
    pub custom_prebuilts: Vec<CustomPrebuilt>,

    /// Parallel job hint for compile stages
    pub nproc: u32,

    /// Host directory holding `.localstack`
    pub state_dir: PathBuf,

    /// Release channel suffix for update pointers
    pub release_channel: String,

    /// Build variant (user, userdebug)
    pub build_type: String,

    /// Android version line, selects the component manifest
    pub android_version: String,

    /// Base URL the updater app polls
    pub release_url: String,

    /// Override for the platform build id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aosp_build: Option<String>,

    /// Override for the platform source branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aosp_branch: Option<String>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

fn default_schema_id() -> String {
    SCHEMA_ID.to_string()
}

impl BuildConfig {
    /// Check invariants that must hold before any work starts
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.device.trim().is_empty() {
            return Err(ModelError::InvalidConfig("device must be set".to_string()));
        }
        if self.stack_version.trim().is_empty() {
            return Err(ModelError::InvalidConfig(
                "stack_version must be set".to_string(),
            ));
        }
        if self.nproc == 0 {
            return Err(ModelError::InvalidConfig(
                "nproc must be greater than 0".to_string(),
            ));
        }
        if self.release_channel.trim().is_empty() {
            return Err(ModelError::InvalidConfig(
                "release_channel must be set".to_string(),
            ));
        }
        if let Some(version) = &self.chromium_version {
            validate_chromium_version(version)?;
        }
        for (key, value) in [("aosp_build", &self.aosp_build), ("aosp_branch", &self.aosp_branch)] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(ModelError::InvalidConfig(format!("{} must not be empty", key)));
            }
        }

        let repos = self
            .custom_patches
            .iter()
            .map(|p| p.repo.as_str())
            .chain(self.custom_scripts.iter().map(|s| s.repo.as_str()))
            .chain(self.custom_prebuilts.iter().map(|p| p.repo.as_str()));
        for repo in repos {
            if repo.trim().is_empty() {
                return Err(ModelError::InvalidConfig(
                    "custom repository URL must not be empty".to_string(),
                ));
            }
        }
        for remote in &self.custom_manifest_remotes {
            if remote.name.is_empty() || remote.fetch.is_empty() {
                return Err(ModelError::InvalidConfig(format!(
                    "manifest remote '{}' needs both name and fetch",
                    remote.name
                )));
            }
        }
        for project in &self.custom_manifest_projects {
            if project.path.is_empty() || project.name.is_empty() || project.remote.is_empty() {
                return Err(ModelError::InvalidConfig(format!(
                    "manifest project '{}' needs path, name and remote",
                    project.name
                )));
            }
        }
        Ok(())
    }

    /// Device profile for the configured device
    pub fn profile(&self) -> DeviceProfile {
        DeviceProfile::resolve(&self.device)
    }

    /// Release channel name as used in store keys (e.g. "crosshatch-stable")
    pub fn channel_key(&self) -> String {
        format!("{}-{}", self.device, self.release_channel)
    }

    /// Custom repositories that do not live under the trusted base
    pub fn untrusted_repos(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        for p in &self.custom_patches {
            if !is_trusted(&p.repo) {
                out.push(("patches", p.repo.as_str()));
            }
        }
        for s in &self.custom_scripts {
            if !is_trusted(&s.repo) {
                out.push(("scripts", s.repo.as_str()));
            }
        }
        for p in &self.custom_prebuilts {
            if !is_trusted(&p.repo) {
                out.push(("prebuilts", p.repo.as_str()));
            }
        }
        out
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON, rejecting unknown schemas
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let config: Self = serde_json::from_str(json)?;
        if config.schema_id != SCHEMA_ID {
            return Err(ModelError::SchemaMismatch {
                expected: SCHEMA_ID.to_string(),
                found: config.schema_id,
            });
        }
        Ok(config)
    }

    /// Write to file
    pub fn write_to_file(&self, path: &Path) -> Result<(), ModelError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load from file
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

fn is_trusted(repo: &str) -> bool {
    repo.to_lowercase().contains(TRUSTED_REPO_BASE)
}

/// Validate a chromium version: four dot-separated integers, major >= 80
pub fn validate_chromium_version(version: &str) -> Result<(), ModelError> {
    let invalid = |reason: String| ModelError::InvalidChromiumVersion {
        version: version.to_string(),
        reason,
    };

    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() != 4 {
        return Err(invalid(format!(
            "expected 4 dot-separated parts, got {}",
            parts.len()
        )));
    }
    let mut numbers = Vec::with_capacity(4);
    for part in &parts {
        let n: u32 = part
            .parse()
            .map_err(|_| invalid(format!("'{}' is not a number", part)))?;
        numbers.push(n);
    }
    if numbers[0] < MINIMUM_CHROMIUM_MAJOR {
        return Err(invalid(format!(
            "major version must be at least {}",
            MINIMUM_CHROMIUM_MAJOR
        )));
    }
    Ok(())
}
