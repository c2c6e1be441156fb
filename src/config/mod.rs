//! Configuration layering
//!
//! Three layers, later wins:
//! 1. Built-in defaults
//! 2. User config (~/.config/localstack/config.toml)
//! 3. CLI flags

mod defaults;
mod effective;
mod merge;

use std::env;
use std::path::PathBuf;

pub use defaults::{BuiltinDefaults, DEFAULT_RELEASE_URL};
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig};
pub use merge::{deep_merge, merge_layers, strip_nulls};

/// Default user config path
pub fn default_config_path() -> PathBuf {
    let base = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from(".config"));
    base.join("localstack/config.toml")
}
