//! Version resolution
//!
//! Fetches the latest upstream versions for a device:
//! - stack release name (only compared against the running stack)
//! - chromium stable version for Android, unless pinned
//! - F-Droid client and privileged extension tags
//! - platform build id and branch for the device, unless overridden
//!
//! Any empty or absent value aborts the run.

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use localstack_model::{BuildConfig, ComponentVersionSet};

use crate::retry::RetryPolicy;

/// Latest stack release
pub const STACK_URL_LATEST: &str =
    "https://api.github.com/repos/dan-v/rattlesnakeos-stack/releases/latest";

/// Chromium release channels for every OS
pub const CHROME_URL_LATEST: &str = "https://omahaproxy.appspot.com/all.json";

/// Per-Android-version component manifests
pub const LATEST_JSON_BASE: &str = "https://raw.githubusercontent.com/RattlesnakeOS/latest";

/// Chromium channel tracked for builds
pub const CHROME_CHANNEL: &str = "stable";

/// Resolution errors
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("fetching {url} failed after {attempts} attempts: {message}")]
    Exhausted {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("unable to determine {what} from {url}")]
    Missing { what: String, url: String },
}

/// Source of upstream JSON metadata
pub trait MetadataSource {
    fn fetch_json(&self, url: &str) -> Result<Value, ResolveError>;
}

/// HTTP metadata source backed by a blocking reqwest client
pub struct HttpMetadataSource {
    client: reqwest::blocking::Client,
    retry: RetryPolicy,
}

impl HttpMetadataSource {
    pub fn new(retry: RetryPolicy) -> Result<Self, ResolveError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("localstack/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ResolveError::Http {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client, retry })
    }

    fn fetch_once(&self, url: &str) -> Result<Value, reqwest::Error> {
        self.client
            .get(url)
            .send()?
            .error_for_status()?
            .json::<Value>()
    }
}

impl MetadataSource for HttpMetadataSource {
    fn fetch_json(&self, url: &str) -> Result<Value, ResolveError> {
        self.retry
            .run(url, |_| self.fetch_once(url))
            .map_err(|e| ResolveError::Exhausted {
                url: url.to_string(),
                attempts: self.retry.max_attempts.max(1),
                message: e.to_string(),
            })
    }
}

/// Canned metadata keyed by URL
#[derive(Debug, Default, Clone)]
pub struct StaticMetadataSource {
    responses: HashMap<String, Value>,
}

impl StaticMetadataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: impl Into<String>, value: Value) -> Self {
        self.responses.insert(url.into(), value);
        self
    }
}

impl MetadataSource for StaticMetadataSource {
    fn fetch_json(&self, url: &str) -> Result<Value, ResolveError> {
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| ResolveError::Http {
                url: url.to_string(),
                message: "404 Not Found".to_string(),
            })
    }
}

/// Endpoints queried during resolution
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub stack_latest: String,
    pub chrome_latest: String,
    pub latest_json_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            stack_latest: STACK_URL_LATEST.to_string(),
            chrome_latest: CHROME_URL_LATEST.to_string(),
            latest_json_base: LATEST_JSON_BASE.to_string(),
        }
    }
}

impl Endpoints {
    pub fn aosp_json(&self, android_version: &str) -> String {
        format!("{}/{}/aosp.json", self.latest_json_base, android_version)
    }

    pub fn fdroid_json(&self, android_version: &str) -> String {
        format!("{}/{}/fdroid.json", self.latest_json_base, android_version)
    }
}

/// Resolves the latest component versions for a config
pub struct VersionResolver<'a> {
    source: &'a dyn MetadataSource,
    endpoints: Endpoints,
}

impl<'a> VersionResolver<'a> {
    pub fn new(source: &'a dyn MetadataSource) -> Self {
        Self {
            source,
            endpoints: Endpoints::default(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Resolve `latest` for the configured device
    pub fn resolve(&self, config: &BuildConfig) -> Result<ComponentVersionSet, ResolveError> {
        let latest_stack = self.latest_stack()?;
        if latest_stack == config.stack_version {
            tracing::info!("Running the latest stack version {}", latest_stack);
        } else {
            tracing::warn!(
                "You should upgrade to the latest stack version: {} (running {})",
                latest_stack,
                config.stack_version
            );
        }

        let browser_engine = match &config.chromium_version {
            Some(pinned) => {
                tracing::info!("Using pinned chromium version {}", pinned);
                pinned.clone()
            }
            None => self.latest_chromium()?,
        };

        let fdroid_url = self.endpoints.fdroid_json(&config.android_version);
        let fdroid = self.source.fetch_json(&fdroid_url)?;
        let app_store_client = required_str(&fdroid, &["client"], "F-Droid client version", &fdroid_url)?;
        let privileged_extension = required_str(
            &fdroid,
            &["privilegedextention"],
            "F-Droid privileged extension version",
            &fdroid_url,
        )?;

        // Each platform field is overridable on its own; the other comes from upstream
        let (platform_build, platform_branch) = match (&config.aosp_build, &config.aosp_branch) {
            (Some(build), Some(branch)) => (build.clone(), branch.clone()),
            (build, branch) => {
                let aosp_url = self.endpoints.aosp_json(&config.android_version);
                let aosp = self.source.fetch_json(&aosp_url)?;
                let device = config.device.as_str();
                let build = match build {
                    Some(build) => build.clone(),
                    None => required_str(&aosp, &[device, "build"], "platform build", &aosp_url)?,
                };
                let branch = match branch {
                    Some(branch) => branch.clone(),
                    None => required_str(&aosp, &[device, "branch"], "platform branch", &aosp_url)?,
                };
                (build, branch)
            }
        };
        if config.aosp_build.is_some() || config.aosp_branch.is_some() {
            tracing::info!("Using platform override {} on {}", platform_build, platform_branch);
        }

        let latest = ComponentVersionSet {
            stack: config.stack_version.clone(),
            platform_build,
            platform_branch,
            browser_engine,
            app_store_client,
            privileged_extension,
        };
        tracing::info!(
            "Latest versions: platform={} ({}) chromium={} fdroid={} fdroid-priv={}",
            latest.platform_build,
            latest.platform_branch,
            latest.browser_engine,
            latest.app_store_client,
            latest.privileged_extension
        );
        Ok(latest)
    }

    fn latest_stack(&self) -> Result<String, ResolveError> {
        let url = &self.endpoints.stack_latest;
        let release = self.source.fetch_json(url)?;
        required_str(&release, &["name"], "latest stack version", url)
    }

    fn latest_chromium(&self) -> Result<String, ResolveError> {
        let url = &self.endpoints.chrome_latest;
        let channels = self.source.fetch_json(url)?;
        channels
            .as_array()
            .into_iter()
            .flatten()
            .filter(|os| os.get("os").and_then(Value::as_str) == Some("android"))
            .filter_map(|os| os.get("versions").and_then(Value::as_array))
            .flatten()
            .filter(|v| v.get("channel").and_then(Value::as_str) == Some(CHROME_CHANNEL))
            .filter_map(|v| v.get("current_version").and_then(Value::as_str))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ResolveError::Missing {
                what: "latest chromium version".to_string(),
                url: url.clone(),
            })
    }
}

fn required_str(value: &Value, path: &[&str], what: &str, url: &str) -> Result<String, ResolveError> {
    let mut current = value;
    for key in path {
        current = match current.get(*key) {
            Some(v) => v,
            None => {
                return Err(ResolveError::Missing {
                    what: what.to_string(),
                    url: url.to_string(),
                })
            }
        };
    }
    match current.as_str().map(str::trim) {
        Some(s) if !s.is_empty() && s != "null" => Ok(s.to_string()),
        _ => Err(ResolveError::Missing {
            what: what.to_string(),
            url: url.to_string(),
        }),
    }
}
