//! Artifact publisher
//!
//! Moves release outputs into the release store:
//! - OTA package at the store root, plus the `{device}-{channel}` pointer
//!   the updater app reads and its `-true-timestamp` companion
//! - factory image as `{device}-factory-latest.tar.xz` (retried)
//! - target-files under `{device}-target/` (retried), older ones pruned
//!
//! Checkpointing is a separate stage that only runs after this succeeds.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use localstack_model::{layout, ComponentVersionSet};

use crate::retry::RetryPolicy;
use crate::store::{BlobStore, StoreError};

/// Entry in the OTA package holding the build metadata
pub const OTA_METADATA_ENTRY: &str = "META-INF/com/android/metadata";

/// Publish errors
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("missing build artifact {0}")]
    MissingArtifact(PathBuf),

    #[error("cannot read OTA metadata from {path}: {message}")]
    Metadata { path: PathBuf, message: String },

    #[error("uploading {key} failed after {attempts} attempts: {source}")]
    Upload {
        key: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outputs of one build, all under `out/release-{device}-{build_number}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifactSet {
    pub build_number: String,
    /// Seconds since the epoch when the build started
    pub build_timestamp: i64,
    pub release_dir: PathBuf,
    pub ota_package: PathBuf,
    pub factory_image: PathBuf,
    pub target_files: PathBuf,
}

impl BuildArtifactSet {
    /// Expected artifact paths for a build in `tree`
    pub fn for_build(tree: &Path, device: &str, build_number: &str, build_timestamp: i64) -> Self {
        let release_dir = tree
            .join("out")
            .join(format!("release-{}-{}", device, build_number));
        Self {
            build_number: build_number.to_string(),
            build_timestamp,
            ota_package: release_dir.join(format!("{}-ota_update-{}.zip", device, build_number)),
            factory_image: release_dir.join(format!("{}-factory-{}.tar.xz", device, build_number)),
            target_files: release_dir.join(format!("{}-target_files-{}.zip", device, build_number)),
            release_dir,
        }
    }

    /// Artifacts not present on disk
    pub fn missing(&self) -> Vec<PathBuf> {
        [&self.ota_package, &self.factory_image, &self.target_files]
            .into_iter()
            .filter(|p| !p.is_file())
            .cloned()
            .collect()
    }
}

/// What was written to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRelease {
    /// Contents of the channel pointer
    pub pointer: String,
    pub ota_key: String,
    pub factory_key: String,
    pub target_key: String,
    /// Older target-files removed
    pub pruned: Vec<String>,
}

/// Publishes build artifacts to the release store
pub struct Publisher<'a> {
    store: &'a dyn BlobStore,
    retry: RetryPolicy,
}

impl<'a> Publisher<'a> {
    pub fn new(store: &'a dyn BlobStore, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn publish(
        &self,
        artifacts: &BuildArtifactSet,
        device: &str,
        channel_key: &str,
        latest: &ComponentVersionSet,
    ) -> Result<PublishedRelease, PublishError> {
        if let Some(path) = artifacts.missing().into_iter().next() {
            return Err(PublishError::MissingArtifact(path));
        }
        let number = &artifacts.build_number;
        let post_timestamp = read_post_timestamp(&artifacts.ota_package)?;

        let ota_key = layout::ota_package(device, number);
        self.store.put_file(&ota_key, &artifacts.ota_package)?;
        let pointer = format!("{} {} {}", number, post_timestamp, latest.platform_build);
        self.store
            .put_string(&layout::release_pointer(channel_key), &pointer)?;
        self.store.put_string(
            &layout::true_timestamp(channel_key),
            &artifacts.build_timestamp.to_string(),
        )?;
        tracing::info!("Published OTA {} ({})", ota_key, pointer);

        let factory_key = layout::factory_latest(device);
        self.upload(&factory_key, &artifacts.factory_image)?;

        let target_key = layout::target_files(device, number);
        self.upload(&target_key, &artifacts.target_files)?;

        let mut pruned = Vec::new();
        for key in self.store.list(&layout::target_dir(device))? {
            if key != target_key {
                self.store.delete(&key)?;
                pruned.push(key);
            }
        }
        if !pruned.is_empty() {
            tracing::info!("Pruned {} old target files", pruned.len());
        }

        Ok(PublishedRelease {
            pointer,
            ota_key,
            factory_key,
            target_key,
            pruned,
        })
    }

    fn upload(&self, key: &str, source: &Path) -> Result<(), PublishError> {
        self.retry
            .run(&format!("upload {}", key), |_| self.store.put_file(key, source))
            .map_err(|source| PublishError::Upload {
                key: key.to_string(),
                attempts: self.retry.max_attempts.max(1),
                source,
            })
    }
}

/// `post-timestamp` from an OTA package's metadata entry
pub fn read_post_timestamp(ota: &Path) -> Result<String, PublishError> {
    let metadata_err = |message: String| PublishError::Metadata {
        path: ota.to_path_buf(),
        message,
    };

    let file = File::open(ota).map_err(|e| metadata_err(e.to_string()))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| metadata_err(e.to_string()))?;
    let mut entry = archive
        .by_name(OTA_METADATA_ENTRY)
        .map_err(|e| metadata_err(format!("{}: {}", OTA_METADATA_ENTRY, e)))?;
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|e: io::Error| metadata_err(e.to_string()))?;

    text.lines()
        .find_map(|l| l.strip_prefix("post-timestamp="))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| metadata_err("no post-timestamp".to_string()))
}
