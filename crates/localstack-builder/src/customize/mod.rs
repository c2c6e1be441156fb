//! Customization pipeline
//!
//! Turns the config into an ordered list of [`CustomizationStep`]s and
//! applies them to the source tree. Order is fixed:
//! 1. upstream component removals from product makefiles
//! 2. local manifest overlay
//! 3. custom patch sets, then custom shell scripts
//! 4. custom prebuilt repositories and their module registration
//! 5. built-in source edits (hosts file, config toggles, model names, ...)
//! 6. package registration for first-party apps and manifest modules
//!
//! Clones are retried; a patch or script that fails is fatal. Every step
//! except custom shell scripts is guarded and safe to re-apply.

mod builtin;
mod edits;
mod manifest;

pub use builtin::{builtin_edits, client_whitelist_hash, OFFICIAL_FDROID_KEY};
pub use edits::{EditKind, EditOutcome, TextEdit};
pub use manifest::{render_local_manifest, LOCAL_MANIFEST_PATH, REMOVED_PROJECTS};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use localstack_model::{BuildConfig, ComponentVersionSet, DeviceProfile};

use crate::keys::KeyBundle;
use crate::retry::RetryPolicy;
use crate::runner::{run_with_retry, CommandRunner, CommandSpec, RunnerError};

/// Directory holding the product makefiles
pub const PRODUCT_DIR: &str = "build/make/target/product";

/// Makefile that receives `PRODUCT_PACKAGES` registrations
pub const PACKAGE_MK_FILE: &str = "build/make/target/product/handheld_system.mk";

/// Destination of custom prebuilt repositories
pub const PREBUILT_DIR: &str = "packages/apps/Custom";

/// Hosts file replaced by a custom one
pub const HOSTS_FILE_PATH: &str = "system/core/rootdir/etc/hosts";

/// Lines removed from every product makefile
pub const REMOVAL_PATTERNS: [&str; 4] = ["Browser2", "Calendar \\", "Calendar.apk", "QuickSearchBox"];

/// Customization errors
#[derive(Debug, thiserror::Error)]
pub enum CustomizeError {
    #[error("cloning {repo} failed: {source}")]
    Clone {
        repo: String,
        #[source]
        source: RunnerError,
    },

    #[error("applying patch {patch} failed: {source}")]
    Patch {
        patch: String,
        #[source]
        source: RunnerError,
    },

    #[error("patch {0} neither applies nor is already applied")]
    PatchConflict(String),

    #[error("script {script} failed: {source}")]
    Script {
        script: String,
        #[source]
        source: RunnerError,
    },

    #[error("fetching hosts file {url} failed: {source}")]
    HostsFile {
        url: String,
        #[source]
        source: RunnerError,
    },

    #[error("reading certificate {cert} failed: {message}")]
    Certificate { cert: String, message: String },

    #[error("editing {path} failed: {source}")]
    Edit {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("template error: {0}")]
    Template(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CustomizeError {
    /// Underlying subprocess error, if any
    pub fn runner_error(&self) -> Option<&RunnerError> {
        match self {
            CustomizeError::Clone { source, .. }
            | CustomizeError::Patch { source, .. }
            | CustomizeError::Script { source, .. }
            | CustomizeError::HostsFile { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// One customization action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomizationStep {
    /// Remove lines matching a pattern from every product makefile
    ManifestRemoval { pattern: String },

    /// Write the local manifest overlay
    LocalManifest { xml: String },

    /// Clone a patch repository and apply its patches in order
    RepoPatchSet {
        index: usize,
        repo: String,
        branch: Option<String>,
        patches: Vec<String>,
    },

    /// Clone a script repository and run its scripts in order
    ShellScript {
        index: usize,
        repo: String,
        branch: Option<String>,
        scripts: Vec<String>,
    },

    /// Clone a prebuilt repository into the tree
    PrebuiltPackage { index: usize, repo: String },

    /// Replace the hosts file with a downloaded one
    HostsFile { url: String },

    /// Whitelist our signing keys in the privileged extension
    ClientWhitelist {
        releasekey_cert: PathBuf,
        platform_cert: PathBuf,
    },

    /// Guarded edit of one file
    TextSubstitution(TextEdit),
}

impl CustomizationStep {
    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            CustomizationStep::ManifestRemoval { pattern } => {
                format!("remove '{}' from product makefiles", pattern)
            }
            CustomizationStep::LocalManifest { .. } => "write local manifest".to_string(),
            CustomizationStep::RepoPatchSet { repo, .. } => format!("apply patches from {}", repo),
            CustomizationStep::ShellScript { repo, .. } => format!("run scripts from {}", repo),
            CustomizationStep::PrebuiltPackage { repo, .. } => format!("add prebuilts from {}", repo),
            CustomizationStep::HostsFile { url } => format!("replace hosts file with {}", url),
            CustomizationStep::ClientWhitelist { .. } => "whitelist signing keys".to_string(),
            CustomizationStep::TextSubstitution(edit) => format!("edit {}", edit.path.display()),
        }
    }
}

/// Register a module in the product package list
pub fn register_package(module: &str) -> CustomizationStep {
    CustomizationStep::TextSubstitution(TextEdit::append_line(
        PACKAGE_MK_FILE,
        format!("PRODUCT_PACKAGES += {}", module),
    ))
}

/// Build the ordered step list
pub fn plan_steps(
    config: &BuildConfig,
    profile: &DeviceProfile,
    latest: &ComponentVersionSet,
    keys: &KeyBundle,
) -> Result<Vec<CustomizationStep>, CustomizeError> {
    let mut steps: Vec<CustomizationStep> = REMOVAL_PATTERNS
        .iter()
        .map(|p| CustomizationStep::ManifestRemoval {
            pattern: p.to_string(),
        })
        .collect();

    steps.push(CustomizationStep::LocalManifest {
        xml: render_local_manifest(config, latest)?,
    });

    for (index, set) in config.custom_patches.iter().enumerate() {
        steps.push(CustomizationStep::RepoPatchSet {
            index,
            repo: set.repo.clone(),
            branch: set.branch.clone(),
            patches: set.patches.clone(),
        });
    }
    for (index, set) in config.custom_scripts.iter().enumerate() {
        steps.push(CustomizationStep::ShellScript {
            index,
            repo: set.repo.clone(),
            branch: set.branch.clone(),
            scripts: set.scripts.clone(),
        });
    }

    for (index, prebuilt) in config.custom_prebuilts.iter().enumerate() {
        steps.push(CustomizationStep::PrebuiltPackage {
            index,
            repo: prebuilt.repo.clone(),
        });
        steps.extend(prebuilt.modules.iter().map(|m| register_package(m)));
    }

    if let Some(url) = &config.hosts_file {
        steps.push(CustomizationStep::HostsFile { url: url.clone() });
    }
    steps.extend(
        builtin_edits(&config.release_url, profile)
            .into_iter()
            .map(CustomizationStep::TextSubstitution),
    );
    steps.push(CustomizationStep::ClientWhitelist {
        releasekey_cert: keys.certificate("releasekey"),
        platform_cert: keys.certificate("platform"),
    });

    let mut packages = vec!["Updater", "F-DroidPrivilegedExtension", "F-Droid", "chromium"];
    if config.enable_attestation {
        packages.push("Auditor");
    }
    steps.extend(packages.into_iter().map(register_package));
    for project in &config.custom_manifest_projects {
        steps.extend(project.modules.iter().map(|m| register_package(m)));
    }

    Ok(steps)
}

/// Applies customization steps to a source tree
pub struct Customizer<'a> {
    runner: &'a dyn CommandRunner,
    retry: RetryPolicy,
    tree: PathBuf,
    work_dir: PathBuf,
    device: String,
}

impl<'a> Customizer<'a> {
    /// `tree` is the source root; clones of patch and script repositories
    /// go under `work_dir`.
    pub fn new(
        runner: &'a dyn CommandRunner,
        retry: RetryPolicy,
        tree: &Path,
        work_dir: &Path,
        device: &str,
    ) -> Self {
        Self {
            runner,
            retry,
            tree: tree.to_path_buf(),
            work_dir: work_dir.to_path_buf(),
            device: device.to_string(),
        }
    }

    /// Apply every step in order, stopping at the first failure
    pub fn apply(&self, steps: &[CustomizationStep]) -> Result<(), CustomizeError> {
        for step in steps {
            tracing::debug!("Customization: {}", step.describe());
            self.apply_step(step)?;
        }
        Ok(())
    }

    fn apply_step(&self, step: &CustomizationStep) -> Result<(), CustomizeError> {
        match step {
            CustomizationStep::ManifestRemoval { pattern } => self.remove_from_products(pattern),
            CustomizationStep::LocalManifest { xml } => {
                self.edit(&TextEdit::write_file(LOCAL_MANIFEST_PATH, xml.clone()))
            }
            CustomizationStep::RepoPatchSet {
                index,
                repo,
                branch,
                patches,
            } => {
                let dest = self.work_dir.join("patches").join(index.to_string());
                self.clone_repo(repo, branch.as_deref(), &dest)?;
                for patch in patches {
                    self.apply_patch(&dest.join(patch))?;
                }
                Ok(())
            }
            CustomizationStep::ShellScript {
                index,
                repo,
                branch,
                scripts,
            } => {
                let dest = self.work_dir.join("scripts").join(index.to_string());
                self.clone_repo(repo, branch.as_deref(), &dest)?;
                for script in scripts {
                    self.run_script(&dest.join(script))?;
                }
                Ok(())
            }
            CustomizationStep::PrebuiltPackage { index, repo } => {
                let dest = self.tree.join(PREBUILT_DIR).join(index.to_string());
                tracing::info!("Putting custom prebuilts from {} in {}", repo, dest.display());
                self.clone_repo(repo, None, &dest)
            }
            CustomizationStep::HostsFile { url } => {
                tracing::info!("Replacing hosts file with {}", url);
                let spec = CommandSpec::new("wget")
                    .arg("-O")
                    .arg(self.tree.join(HOSTS_FILE_PATH).to_string_lossy())
                    .arg(url.as_str());
                run_with_retry(self.runner, &self.retry, &spec)
                    .map(|_| ())
                    .map_err(|source| CustomizeError::HostsFile {
                        url: url.clone(),
                        source,
                    })
            }
            CustomizationStep::ClientWhitelist {
                releasekey_cert,
                platform_cert,
            } => {
                let release_hash = client_whitelist_hash(self.runner, releasekey_cert)?;
                let platform_hash = client_whitelist_hash(self.runner, platform_cert)?;
                self.edit(&builtin::whitelist_edit(&release_hash, &platform_hash))
            }
            CustomizationStep::TextSubstitution(edit) => self.edit(edit),
        }
    }

    fn edit(&self, edit: &TextEdit) -> Result<(), CustomizeError> {
        match edit.apply(&self.tree) {
            Ok(EditOutcome::Skipped) => {
                tracing::debug!("Skipping edit of missing {}", edit.path.display());
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(source) => Err(CustomizeError::Edit {
                path: edit.path.clone(),
                source,
            }),
        }
    }

    fn remove_from_products(&self, pattern: &str) -> Result<(), CustomizeError> {
        let dir = self.tree.join(PRODUCT_DIR);
        if !dir.is_dir() {
            return Ok(());
        }
        let mut makefiles: Vec<PathBuf> = walkdir::WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "mk"))
            .collect();
        makefiles.sort();

        for path in makefiles {
            let rel = path.strip_prefix(&self.tree).unwrap_or(&path).to_path_buf();
            self.edit(&TextEdit::delete_lines(rel, pattern))?;
        }
        Ok(())
    }

    fn clone_repo(&self, repo: &str, branch: Option<&str>, dest: &Path) -> Result<(), CustomizeError> {
        let mut spec = CommandSpec::new("git").arg("clone");
        if let Some(branch) = branch {
            spec = spec.args(["--branch", branch]);
        }
        let spec = spec.arg(repo).arg(dest.to_string_lossy());

        self.retry
            .run(&format!("git clone {}", repo), |_| {
                if dest.exists() {
                    fs::remove_dir_all(dest)?;
                }
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                self.runner.run(&spec)
            })
            .map(|_| ())
            .map_err(|last| CustomizeError::Clone {
                repo: repo.to_string(),
                source: RunnerError::RetriesExhausted {
                    label: spec.display(),
                    attempts: self.retry.max_attempts.max(1),
                    last: Box::new(last),
                },
            })
    }

    /// Apply a patch unless it is already applied
    fn apply_patch(&self, patch: &Path) -> Result<(), CustomizeError> {
        let name = patch.to_string_lossy().into_owned();
        let base = CommandSpec::new("patch")
            .args(["-p1", "--no-backup-if-mismatch", "--input"])
            .arg(name.as_str())
            .cwd(&self.tree);

        let forward = base.clone().arg("--dry-run").arg("--silent");
        if self.runner.run(&forward).is_ok() {
            tracing::info!("Applying patch {}", name);
            return self
                .runner
                .run(&base)
                .map(|_| ())
                .map_err(|source| CustomizeError::Patch {
                    patch: name.clone(),
                    source,
                });
        }

        let reverse = base.arg("--reverse").arg("--dry-run").arg("--silent");
        if self.runner.run(&reverse).is_ok() {
            tracing::info!("Patch {} already applied", name);
            return Ok(());
        }
        Err(CustomizeError::PatchConflict(name))
    }

    fn run_script(&self, script: &Path) -> Result<(), CustomizeError> {
        let name = script.to_string_lossy().into_owned();
        tracing::info!("Applying shell script {}", name);
        let spec = CommandSpec::new("bash")
            .arg(name.as_str())
            .cwd(&self.tree)
            .env("BUILD_DIR", self.tree.to_string_lossy())
            .env("DEVICE", self.device.as_str());
        self.runner
            .run(&spec)
            .map(|_| ())
            .map_err(|source| CustomizeError::Script { script: name, source })
    }
}
