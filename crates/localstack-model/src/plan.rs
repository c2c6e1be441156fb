//! Build plan handed from the host into the container
//!
//! The host resolves versions and decides before touching the container
//! runtime. When a build is required it writes a `BuildPlan` next to the
//! release store so the in-container builder works from exactly the same
//! `latest` set that justified the build.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ModelError;
use crate::versions::ComponentVersionSet;

/// Schema version for build_plan.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "localstack/build_plan@1";

/// Everything the builder needs beyond `BuildConfig`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildPlan {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Run identifier for log correlation
    pub run_id: String,

    /// Device codename
    pub device: String,

    /// Whether the build was forced from the CLI
    pub force: bool,

    /// Versions resolved upstream; checkpointed on success
    pub latest: ComponentVersionSet,

    /// Reasons the build was required
    pub reasons: Vec<String>,

    /// When the plan was made; drives build number and timestamp
    pub started_at: DateTime<Utc>,
}

impl BuildPlan {
    pub fn new(
        run_id: impl Into<String>,
        device: impl Into<String>,
        force: bool,
        latest: ComponentVersionSet,
        reasons: Vec<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            run_id: run_id.into(),
            device: device.into(),
            force,
            latest,
            reasons,
            started_at,
        }
    }

    /// Build number in `YYYY.MM.DD.HH` (UTC)
    pub fn build_number(&self) -> String {
        self.started_at.format("%Y.%m.%d.%H").to_string()
    }

    /// Build timestamp in seconds since the epoch
    pub fn build_timestamp(&self) -> i64 {
        self.started_at.timestamp()
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let plan: Self = serde_json::from_str(json)?;
        if plan.schema_id != SCHEMA_ID {
            return Err(ModelError::SchemaMismatch {
                expected: SCHEMA_ID.to_string(),
                found: plan.schema_id,
            });
        }
        Ok(plan)
    }

    /// Write to file
    pub fn write_to_file(&self, path: &Path) -> Result<(), ModelError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load from file
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}
