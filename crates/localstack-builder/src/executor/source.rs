//! Toolchain setup, source checkout, vendor files and the legacy kernel

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::customize::{render_local_manifest, TextEdit, LOCAL_MANIFEST_PATH};
use crate::retry::RetryPolicy;
use crate::run::BuildRunState;
use crate::runner::CommandSpec;

use super::{io_err, path_with, BuildStage, Executor, StageError};

/// Android SDK command line tools
pub const ANDROID_SDK_URL: &str =
    "https://dl.google.com/android/repository/sdk-tools-linux-4333796.zip";

/// Platform manifest repository
pub const MANIFEST_URL: &str = "https://android.googlesource.com/platform/manifest";

const DEPOT_TOOLS_URL: &str = "https://chromium.googlesource.com/chromium/tools/depot_tools.git";
const KERNEL_SOURCE_URL: &str = "https://android.googlesource.com/kernel/msm";
const SDK_PACKAGES: [&str; 2] = ["build-tools;27.0.3", "platforms;android-27"];

/// Vendor extraction wall-clock limit
const VENDOR_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Source sync attempts
const SYNC_ATTEMPTS: u32 = 10;

/// Where the vendor tool leaves files for a device and build id
pub fn vendor_source_dir(tree: &Path, device: &str, build_id: &str) -> PathBuf {
    tree.join("vendor/android-prepare-vendor")
        .join(device)
        .join(build_id.to_lowercase())
        .join("vendor/google_devices")
}

/// Kernel commit from a `Linux version` banner.
///
/// `Linux version 3.18.137-g8a9ad1e (android-build@...)` gives `8a9ad1e`.
pub fn kernel_commit(banner: &str) -> Option<String> {
    let line = banner.lines().find(|l| l.contains("Linux version"))?;
    let release = line.split(' ').nth(2)?;
    let hash = release.split('-').nth(1)?;
    let hash = hash.strip_prefix('g').unwrap_or(hash);
    (!hash.is_empty()).then(|| hash.to_string())
}

impl Executor<'_> {
    pub(super) fn install_dependencies(&self) -> Result<(), StageError> {
        let stage = BuildStage::InstallDependencies;
        let sdk = self.workspace.sdk();
        let sdkmanager = sdk.join("tools/bin/sdkmanager");

        if sdkmanager.is_file() {
            tracing::info!("Android SDK already installed");
        } else {
            fs::create_dir_all(&sdk).map_err(io_err(stage))?;
            self.retried(
                stage,
                &self.retry,
                &CommandSpec::new("wget")
                    .arg(ANDROID_SDK_URL)
                    .args(["-O", "sdk-tools.zip"])
                    .cwd(&sdk),
            )?;
            self.command(
                stage,
                &CommandSpec::new("unzip").args(["-o", "sdk-tools.zip"]).cwd(&sdk),
            )?;
            self.command(
                stage,
                &CommandSpec::shell("yes | ./tools/bin/sdkmanager --licenses").cwd(&sdk),
            )?;
            self.command(
                stage,
                &CommandSpec::shell(format!(
                    "yes | ./tools/bin/sdkmanager \"{}\" \"{}\"",
                    SDK_PACKAGES[0], SDK_PACKAGES[1]
                ))
                .cwd(&sdk),
            )?;
        }

        let depot_tools = self.workspace.depot_tools();
        if depot_tools.is_dir() {
            tracing::info!("depot_tools already installed");
        } else {
            self.retried(
                stage,
                &self.retry,
                &CommandSpec::new("git")
                    .args(["clone", DEPOT_TOOLS_URL])
                    .arg(depot_tools.to_string_lossy()),
            )?;
        }

        for (key, value) in [("user.name", "unknown"), ("user.email", "unknown@localhost")] {
            let present = self
                .runner
                .run(&CommandSpec::new("git").args(["config", "--get", "--global", key]).capture())
                .map(|out| !out.stdout.trim().is_empty())
                .unwrap_or(false);
            if !present {
                self.command(
                    stage,
                    &CommandSpec::new("git").args(["config", "--global", key, value]),
                )?;
            }
        }
        Ok(())
    }

    pub(super) fn source_init(&self, state: &BuildRunState) -> Result<(), StageError> {
        let stage = BuildStage::SourceInit;
        let tree = &self.workspace.tree;
        fs::create_dir_all(tree).map_err(io_err(stage))?;

        if tree.join(".repo").is_dir() {
            self.command(
                stage,
                &CommandSpec::new("repo")
                    .args(["forall", "-vc", "git reset --hard"])
                    .cwd(tree),
            )?;
        }

        let branch = &state.plan.latest.platform_branch;
        if branch.is_empty() {
            return Err(StageError::MissingState {
                stage: stage.name(),
                what: "platform branch",
            });
        }
        self.retried(
            stage,
            &self.retry,
            &CommandSpec::new("repo")
                .args(["init", "--manifest-url", MANIFEST_URL, "--manifest-branch"])
                .arg(branch.as_str())
                .args(["--depth", "1"])
                .cwd(tree),
        )?;

        // The overlay has to exist before the sync to take effect
        let xml = render_local_manifest(self.config, &state.plan.latest)?;
        TextEdit::write_file(LOCAL_MANIFEST_PATH, xml)
            .apply(tree)
            .map_err(io_err(stage))?;
        Ok(())
    }

    pub(super) fn source_sync(&self) -> Result<(), StageError> {
        let policy = RetryPolicy {
            max_attempts: self.retry.max_attempts.max(SYNC_ATTEMPTS),
            ..self.retry.clone()
        };
        self.retried(
            BuildStage::SourceSync,
            &policy,
            &CommandSpec::new("repo")
                .args(["sync", "-c", "--no-tags", "--no-clone-bundle", "--force-sync"])
                .args(["--jobs", "32"])
                .cwd(&self.workspace.tree),
        )?;
        Ok(())
    }

    pub(super) fn vendor_extraction(&self, state: &BuildRunState) -> Result<(), StageError> {
        let stage = BuildStage::VendorExtraction;
        let tree = &self.workspace.tree;
        let device = &state.profile.codename;
        let build_id = &state.plan.latest.platform_build;
        let prepare = tree.join("vendor/android-prepare-vendor");

        self.command(
            stage,
            &CommandSpec::new(prepare.join("execute-all.sh").to_string_lossy())
                .args(["--debugfs", "--keep", "--yes", "--device"])
                .arg(device.as_str())
                .arg("--buildID")
                .arg(build_id.as_str())
                .arg("--output")
                .arg(prepare.to_string_lossy())
                .cwd(tree)
                .timeout(VENDOR_TIMEOUT),
        )?;

        let source = vendor_source_dir(tree, device, build_id);
        let dest = tree.join("vendor/google_devices");
        fs::create_dir_all(&dest).map_err(io_err(stage))?;

        let mut names = vec![device.as_str()];
        if state.profile.needs_family_vendor() {
            names.push(state.profile.family.as_str());
        }
        for name in names {
            let from = source.join(name);
            if !from.is_dir() {
                return Err(StageError::MissingOutput {
                    stage: stage.name(),
                    path: from,
                });
            }
            let to = dest.join(name);
            if to.exists() {
                fs::remove_dir_all(&to).map_err(io_err(stage))?;
            }
            fs::rename(&from, &to).map_err(io_err(stage))?;
            tracing::info!("Moved vendor files for {} into the tree", name);
        }
        Ok(())
    }

    pub(super) fn kernel_rebuild(&self, state: &BuildRunState) -> Result<(), StageError> {
        let stage = BuildStage::KernelRebuild;
        let tree = &self.workspace.tree;
        let kernel = &self.workspace.kernel;
        let keys = state.keys.as_ref().ok_or(StageError::MissingState {
            stage: stage.name(),
            what: "key bundle",
        })?;

        let clone = CommandSpec::new("git")
            .args(["clone", KERNEL_SOURCE_URL])
            .arg(kernel.to_string_lossy());
        self.retry
            .run("git clone kernel", |_| {
                if kernel.exists() {
                    fs::remove_dir_all(kernel)?;
                }
                if let Some(parent) = kernel.parent() {
                    fs::create_dir_all(parent)?;
                }
                self.runner.run(&clone)
            })
            .map_err(|source| StageError::Command {
                stage: stage.name(),
                source,
            })?;

        let image = tree.join("device/google/marlin-kernel/Image.lz4-dtb");
        let banner = self.command(
            stage,
            &CommandSpec::shell(format!(
                "lz4cat '{}' | grep -a 'Linux version'",
                image.display()
            ))
            .capture(),
        )?;
        let commit = kernel_commit(&banner.stdout).ok_or_else(|| StageError::Invalid {
            stage: stage.name(),
            message: format!("no kernel version banner in {}", image.display()),
        })?;
        tracing::info!("Checking out kernel commit {}", commit);
        self.command(
            stage,
            &CommandSpec::new("git").args(["checkout", commit.as_str()]).cwd(kernel),
        )?;

        fs::copy(
            keys.dir.join("verity_user.der.x509"),
            kernel.join("verity_user.der.x509"),
        )
        .map_err(io_err(stage))?;

        let path = path_with(&[
            tree.join("prebuilts/gcc/linux-x86/aarch64/aarch64-linux-android-4.9/bin"),
            tree.join("prebuilts/gcc/linux-x86/arm/arm-linux-androideabi-4.9/bin"),
            tree.join("prebuilts/misc/linux-x86/lz4"),
            tree.join("prebuilts/misc/linux-x86/dtc"),
            tree.join("prebuilts/misc/linux-x86/libufdt"),
        ]);
        self.command(
            stage,
            &CommandSpec::new("make")
                .args(["O=out", "ARCH=arm64", "marlin_defconfig"])
                .cwd(kernel)
                .env("PATH", path.as_str()),
        )?;
        self.command(
            stage,
            &CommandSpec::new("make")
                .arg(format!("-j{}", self.config.nproc))
                .args([
                    "O=out",
                    "ARCH=arm64",
                    "CROSS_COMPILE=aarch64-linux-android-",
                    "CROSS_COMPILE_ARM32=arm-linux-androideabi-",
                ])
                .cwd(kernel)
                .env("PATH", path.as_str()),
        )?;

        let built = kernel.join("out/arch/arm64/boot/Image.lz4-dtb");
        if !built.is_file() {
            return Err(StageError::MissingOutput {
                stage: stage.name(),
                path: built,
            });
        }
        fs::copy(&built, &image).map_err(io_err(stage))?;
        Ok(())
    }
}
