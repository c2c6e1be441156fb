//! Build executor
//!
//! Runs the build as an explicit ordered list of [`BuildStage`]s. Each
//! stage logs a dated header, blocks until done and fails fast. Only
//! network-bound commands inside a stage (clone, fetch, sync) are retried;
//! compile and packaging commands never are.

mod apps;
mod release;
mod source;

pub use apps::{chromium_version_code, CHROMIUM_TARGETS};
pub use release::{signing_flags, FACTORY_SCRIPT};
pub use source::{kernel_commit, vendor_source_dir, ANDROID_SDK_URL, MANIFEST_URL};

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use localstack_model::{BuildConfig, DeviceProfile};

use crate::checkpoint;
use crate::customize::{self, CustomizeError, Customizer};
use crate::keys::{KeyError, KeyManager};
use crate::publish::{PublishError, Publisher};
use crate::retry::RetryPolicy;
use crate::run::BuildRunState;
use crate::runner::{run_with_retry, CommandOutput, CommandRunner, CommandSpec, RunnerError};
use crate::store::{BlobStore, StoreError};

/// One step of the build, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStage {
    InstallDependencies,
    SourceInit,
    SourceSync,
    Keys,
    VendorExtraction,
    BrowserEngine,
    AppStoreClient,
    Customization,
    KernelRebuild,
    BrowserIntegration,
    Compile,
    Packaging,
    Signing,
    OtaGeneration,
    ImageGeneration,
    FactoryImage,
    Publish,
    Checkpoint,
}

impl BuildStage {
    /// Every stage in order, including the legacy kernel rebuild
    pub const ALL: [BuildStage; 18] = [
        BuildStage::InstallDependencies,
        BuildStage::SourceInit,
        BuildStage::SourceSync,
        BuildStage::Keys,
        BuildStage::VendorExtraction,
        BuildStage::BrowserEngine,
        BuildStage::AppStoreClient,
        BuildStage::Customization,
        BuildStage::KernelRebuild,
        BuildStage::BrowserIntegration,
        BuildStage::Compile,
        BuildStage::Packaging,
        BuildStage::Signing,
        BuildStage::OtaGeneration,
        BuildStage::ImageGeneration,
        BuildStage::FactoryImage,
        BuildStage::Publish,
        BuildStage::Checkpoint,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BuildStage::InstallDependencies => "install-dependencies",
            BuildStage::SourceInit => "source-init",
            BuildStage::SourceSync => "source-sync",
            BuildStage::Keys => "keys",
            BuildStage::VendorExtraction => "vendor-extraction",
            BuildStage::BrowserEngine => "browser-engine",
            BuildStage::AppStoreClient => "app-store-client",
            BuildStage::Customization => "customization",
            BuildStage::KernelRebuild => "kernel-rebuild",
            BuildStage::BrowserIntegration => "browser-integration",
            BuildStage::Compile => "compile",
            BuildStage::Packaging => "packaging",
            BuildStage::Signing => "signing",
            BuildStage::OtaGeneration => "ota-generation",
            BuildStage::ImageGeneration => "image-generation",
            BuildStage::FactoryImage => "factory-image",
            BuildStage::Publish => "publish",
            BuildStage::Checkpoint => "checkpoint",
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stage list for a device; the kernel rebuild only applies to legacy families
pub fn stages_for(profile: &DeviceProfile) -> Vec<BuildStage> {
    BuildStage::ALL
        .into_iter()
        .filter(|s| *s != BuildStage::KernelRebuild || profile.kernel_rebuild)
        .collect()
}

/// Stage errors
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Keys(#[from] KeyError),

    #[error(transparent)]
    Customize(#[from] CustomizeError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("[{stage}] {source}")]
    Command {
        stage: &'static str,
        #[source]
        source: RunnerError,
    },

    #[error("[{stage}] {source}")]
    Io {
        stage: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("[{stage}] expected {path:?} after the stage ran")]
    MissingOutput { stage: &'static str, path: PathBuf },

    #[error("[{stage}] {what} is not available")]
    MissingState {
        stage: &'static str,
        what: &'static str,
    },

    #[error("[{stage}] {message}")]
    Invalid {
        stage: &'static str,
        message: String,
    },
}

impl StageError {
    /// Underlying subprocess error, if any
    pub fn runner_error(&self) -> Option<&RunnerError> {
        match self {
            StageError::Command { source, .. } => Some(source),
            StageError::Customize(e) => e.runner_error(),
            _ => None,
        }
    }
}

/// Directory layout inside the build container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Platform source tree
    pub tree: PathBuf,
    /// Android SDK and depot_tools
    pub tools: PathBuf,
    /// Chromium checkout
    pub chromium: PathBuf,
    /// F-Droid client checkout
    pub fdroid: PathBuf,
    /// Legacy kernel checkout
    pub kernel: PathBuf,
    /// Per-device key bundles
    pub keys: PathBuf,
    /// Clones of custom patch and script repositories
    pub scripts: PathBuf,
}

impl Workspace {
    /// Layout matching the container's volume mounts
    pub fn container() -> Self {
        Self {
            tree: PathBuf::from("/build/aosp"),
            tools: PathBuf::from("/build/tools"),
            chromium: PathBuf::from("/staging/chromium"),
            fdroid: PathBuf::from("/staging/fdroidclient"),
            kernel: PathBuf::from("/build/kernel/google/marlin"),
            keys: PathBuf::from("/keys"),
            scripts: PathBuf::from("/scripts"),
        }
    }

    /// Same layout rooted at one directory
    pub fn under(root: &Path) -> Self {
        Self {
            tree: root.join("aosp"),
            tools: root.join("tools"),
            chromium: root.join("chromium"),
            fdroid: root.join("fdroidclient"),
            kernel: root.join("kernel/google/marlin"),
            keys: root.join("keys"),
            scripts: root.join("scripts"),
        }
    }

    pub fn sdk(&self) -> PathBuf {
        self.tools.join("sdk")
    }

    pub fn depot_tools(&self) -> PathBuf {
        self.tools.join("depot_tools")
    }
}

/// Executes build stages against a workspace
pub struct Executor<'a> {
    runner: &'a dyn CommandRunner,
    store: &'a dyn BlobStore,
    config: &'a BuildConfig,
    workspace: Workspace,
    retry: RetryPolicy,
}

impl<'a> Executor<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        store: &'a dyn BlobStore,
        config: &'a BuildConfig,
        workspace: Workspace,
    ) -> Self {
        Self {
            runner,
            store,
            config,
            workspace,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Run one stage
    pub fn execute(&self, stage: BuildStage, state: &mut BuildRunState) -> Result<(), StageError> {
        tracing::info!("==================================");
        tracing::info!("Running {}", stage);
        tracing::info!("==================================");
        state.current_stage = Some(stage);

        match stage {
            BuildStage::InstallDependencies => self.install_dependencies(),
            BuildStage::SourceInit => self.source_init(state),
            BuildStage::SourceSync => self.source_sync(),
            BuildStage::Keys => {
                let manager = KeyManager::new(self.runner, &self.workspace.keys, &self.workspace.tree);
                state.keys = Some(manager.ensure_keys(&state.profile)?);
                Ok(())
            }
            BuildStage::VendorExtraction => self.vendor_extraction(state),
            BuildStage::BrowserEngine => self.browser_engine(state),
            BuildStage::AppStoreClient => self.app_store_client(state),
            BuildStage::Customization => self.customization(state),
            BuildStage::KernelRebuild => self.kernel_rebuild(state),
            BuildStage::BrowserIntegration => self.browser_integration(),
            BuildStage::Compile => self.compile(state),
            BuildStage::Packaging => self.packaging(state),
            BuildStage::Signing => self.signing(state),
            BuildStage::OtaGeneration => self.ota_generation(state),
            BuildStage::ImageGeneration => self.image_generation(state),
            BuildStage::FactoryImage => self.factory_image(state),
            BuildStage::Publish => {
                let artifacts = state.artifacts.clone().ok_or(StageError::MissingState {
                    stage: stage.name(),
                    what: "artifact set",
                })?;
                Publisher::new(self.store, self.retry.clone()).publish(
                    &artifacts,
                    &state.profile.codename,
                    &self.config.channel_key(),
                    &state.plan.latest,
                )?;
                Ok(())
            }
            BuildStage::Checkpoint => {
                checkpoint::write_checkpoint(self.store, &state.profile.codename, &state.plan.latest)?;
                Ok(())
            }
        }
    }

    fn customization(&self, state: &BuildRunState) -> Result<(), StageError> {
        let keys = state.keys.as_ref().ok_or(StageError::MissingState {
            stage: BuildStage::Customization.name(),
            what: "key bundle",
        })?;
        let steps = customize::plan_steps(self.config, &state.profile, &state.plan.latest, keys)?;
        Customizer::new(
            self.runner,
            self.retry.clone(),
            &self.workspace.tree,
            &self.workspace.scripts,
            &state.profile.codename,
        )
        .apply(&steps)?;
        Ok(())
    }

    fn command(&self, stage: BuildStage, spec: &CommandSpec) -> Result<CommandOutput, StageError> {
        self.runner.run(spec).map_err(|source| StageError::Command {
            stage: stage.name(),
            source,
        })
    }

    fn retried(
        &self,
        stage: BuildStage,
        policy: &RetryPolicy,
        spec: &CommandSpec,
    ) -> Result<CommandOutput, StageError> {
        run_with_retry(self.runner, policy, spec).map_err(|source| StageError::Command {
            stage: stage.name(),
            source,
        })
    }
}

fn io_err(stage: BuildStage) -> impl FnOnce(io::Error) -> StageError {
    move |source| StageError::Io {
        stage: stage.name(),
        source,
    }
}

/// `PATH` with extra directories prepended
fn path_with(dirs: &[PathBuf]) -> String {
    let mut parts: Vec<String> = dirs.iter().map(|d| d.to_string_lossy().into_owned()).collect();
    if let Ok(current) = std::env::var("PATH") {
        parts.push(current);
    }
    parts.join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_unique() {
        let mut names: Vec<_> = BuildStage::ALL.iter().map(BuildStage::name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 18);
    }

    #[test]
    fn test_kernel_rebuild_only_for_legacy() {
        let marlin = stages_for(&DeviceProfile::resolve("marlin"));
        assert_eq!(marlin.len(), 18);
        let customization = marlin.iter().position(|s| *s == BuildStage::Customization).unwrap();
        let kernel = marlin.iter().position(|s| *s == BuildStage::KernelRebuild).unwrap();
        assert_eq!(kernel, customization + 1);

        let crosshatch = stages_for(&DeviceProfile::resolve("crosshatch"));
        assert_eq!(crosshatch.len(), 17);
        assert!(!crosshatch.contains(&BuildStage::KernelRebuild));
    }

    #[test]
    fn test_stage_order_invariants() {
        let stages = stages_for(&DeviceProfile::resolve("sargo"));
        let at = |s: BuildStage| stages.iter().position(|x| *x == s).unwrap();
        assert!(at(BuildStage::Keys) < at(BuildStage::Signing));
        assert!(at(BuildStage::Customization) < at(BuildStage::Compile));
        assert!(at(BuildStage::Publish) < at(BuildStage::Checkpoint));
        assert_eq!(stages.last(), Some(&BuildStage::Checkpoint));
    }

    #[test]
    fn test_runner_error_passthrough() {
        let err = StageError::Command {
            stage: "source-sync",
            source: RunnerError::Failed {
                command: "repo sync".to_string(),
                code: Some(1),
            },
        };
        assert!(err.runner_error().is_some());
        assert_eq!(err.to_string(), "[source-sync] 'repo sync' exited with status 1");

        let missing = StageError::MissingState {
            stage: "signing",
            what: "key bundle",
        };
        assert!(missing.runner_error().is_none());
    }
}
