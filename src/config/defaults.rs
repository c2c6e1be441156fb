//! Built-in defaults (layer 1)
//!
//! Everything except the device has a usable default.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::thread;

/// Release URL the updater app polls unless configured
pub const DEFAULT_RELEASE_URL: &str = "https://ota.ballmerlabs.net";

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Stack name (default: "localstack")
    pub name: String,

    /// Version of the running stack
    pub stack_version: String,

    pub ignore_version_checks: bool,

    pub enable_attestation: bool,

    /// Parallel jobs (default: available CPUs)
    pub nproc: u32,

    /// Directory holding `.localstack` (default: $HOME)
    pub state_dir: PathBuf,

    /// Release channel (default: "stable")
    pub release_channel: String,

    /// Build variant (default: "user")
    pub build_type: String,

    /// Android version line (default: "10.0")
    pub android_version: String,

    pub release_url: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        let nproc = thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        let state_dir = env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            name: "localstack".to_string(),
            stack_version: env!("CARGO_PKG_VERSION").to_string(),
            ignore_version_checks: false,
            enable_attestation: false,
            nproc,
            state_dir,
            release_channel: "stable".to_string(),
            build_type: "user".to_string(),
            android_version: "10.0".to_string(),
            release_url: DEFAULT_RELEASE_URL.to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "stack_version": self.stack_version,
            "ignore_version_checks": self.ignore_version_checks,
            "enable_attestation": self.enable_attestation,
            "nproc": self.nproc,
            "state_dir": self.state_dir.to_string_lossy(),
            "release_channel": self.release_channel,
            "build_type": self.build_type,
            "android_version": self.android_version,
            "release_url": self.release_url,
        })
    }
}
