//! Component version sets
//!
//! A `ComponentVersionSet` is built twice per run: once from upstream
//! (latest) and once from the release store (recorded). Staleness compares
//! the five tracked components; the platform branch only steers source sync.

use serde::{Deserialize, Serialize};

/// A tracked upstream component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Stack,
    Platform,
    BrowserEngine,
    AppStoreClient,
    PrivilegedExtension,
}

impl Component {
    /// All tracked components in comparison order
    pub const ALL: [Component; 5] = [
        Component::Stack,
        Component::Platform,
        Component::BrowserEngine,
        Component::AppStoreClient,
        Component::PrivilegedExtension,
    ];

    /// Human-readable label used in decision reasons
    pub fn label(&self) -> &'static str {
        match self {
            Component::Stack => "stack version",
            Component::Platform => "platform build",
            Component::BrowserEngine => "chromium version",
            Component::AppStoreClient => "F-Droid client version",
            Component::PrivilegedExtension => "F-Droid privileged extension version",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Versions of every upstream component that feeds a build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentVersionSet {
    /// Stack release name (e.g. "v5")
    pub stack: String,

    /// Platform build id for the device (e.g. "QQ3A.200805.001")
    pub platform_build: String,

    /// Platform source branch for the build id
    #[serde(default)]
    pub platform_branch: String,

    /// Chromium version, four dotted integers
    pub browser_engine: String,

    /// F-Droid client tag
    pub app_store_client: String,

    /// F-Droid privileged extension tag
    pub privileged_extension: String,
}

impl ComponentVersionSet {
    /// Version string for a tracked component
    pub fn get(&self, component: Component) -> &str {
        match component {
            Component::Stack => &self.stack,
            Component::Platform => &self.platform_build,
            Component::BrowserEngine => &self.browser_engine,
            Component::AppStoreClient => &self.app_store_client,
            Component::PrivilegedExtension => &self.privileged_extension,
        }
    }

    /// Components whose value is empty
    pub fn missing(&self) -> Vec<Component> {
        Component::ALL
            .into_iter()
            .filter(|c| self.get(*c).trim().is_empty())
            .collect()
    }

    /// Components whose value differs from `other`
    pub fn differing(&self, other: &ComponentVersionSet) -> Vec<Component> {
        Component::ALL
            .into_iter()
            .filter(|c| self.get(*c) != other.get(*c))
            .collect()
    }
}
