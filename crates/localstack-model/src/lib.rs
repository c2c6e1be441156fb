//! Shared model for the localstack build orchestrator
//!
//! Types exchanged between the host CLI and the in-container builder:
//! - [`BuildConfig`]: immutable per-run configuration
//! - [`ComponentVersionSet`]: upstream component versions (latest or recorded)
//! - [`BuildDecision`]: outcome of the staleness check
//! - [`DeviceProfile`]: static device catalog with signing modes
//! - [`BuildPlan`]: hand-off record passed from host to container
//! - [`layout`]: key layout of the release store

pub mod config;
pub mod decision;
pub mod device;
pub mod error;
pub mod layout;
pub mod plan;
pub mod versions;

pub use config::{
    validate_chromium_version, BuildConfig, CustomPatchSet, CustomPrebuilt, CustomScriptSet,
    ManifestProject, ManifestRemote, MINIMUM_CHROMIUM_MAJOR, TRUSTED_REPO_BASE,
};
pub use decision::BuildDecision;
pub use device::{DeviceProfile, SigningMode, SUPPORTED_DEVICES};
pub use error::ModelError;
pub use plan::BuildPlan;
pub use versions::{Component, ComponentVersionSet};
