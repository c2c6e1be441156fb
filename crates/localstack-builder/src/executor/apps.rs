//! Chromium and F-Droid builds

use std::fs;

use localstack_model::layout;

use crate::retry::RetryPolicy;
use crate::run::BuildRunState;
use crate::runner::CommandSpec;

use super::{io_err, path_with, BuildStage, Executor, StageError};

/// Chromium build targets and the APK each one produces
pub const CHROMIUM_TARGETS: [(&str, &str, &str); 2] = [
    (
        "chrome_modern_public_apk",
        "ChromeModernPublic.apk",
        layout::CHROMIUM_BROWSER_APK,
    ),
    (
        "system_webview_apk",
        "SystemWebView.apk",
        layout::CHROMIUM_WEBVIEW_APK,
    ),
];

const FDROID_CLIENT_URL: &str = "https://gitlab.com/fdroid/fdroidclient";
const FDROID_APK: &str = "app/build/outputs/apk/full/release/app-full-release-unsigned.apk";
const GCLIENT_ATTEMPTS: u32 = 5;

/// Android version code for a chromium version: build number, zero-padded
/// patch number and a fixed `52` suffix.
pub fn chromium_version_code(version: &str) -> Option<String> {
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() != 4 {
        return None;
    }
    let build: u32 = parts[2].parse().ok()?;
    let patch: u32 = parts[3].parse().ok()?;
    Some(format!("{}{:03}52", build, patch))
}

fn args_gn(version: &str, version_code: &str) -> String {
    format!(
        r#"target_os = "android"
target_cpu = "arm64"
is_debug = false
is_official_build = true
is_component_build = false
symbol_level = 1
ffmpeg_branding = "Chrome"
proprietary_codecs = true
android_channel = "stable"
android_default_version_name = "{}"
android_default_version_code = "{}"
"#,
        version, version_code
    )
}

impl Executor<'_> {
    /// Whether the cached APKs already match `version`
    fn chromium_cached(&self, version: &str) -> Result<bool, StageError> {
        if self.store.get_string(layout::CHROMIUM_BUILT_REVISION)?.as_deref() != Some(version) {
            return Ok(false);
        }
        for (_, _, key) in CHROMIUM_TARGETS {
            if !self.store.exists(key)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(super) fn browser_engine(&self, state: &BuildRunState) -> Result<(), StageError> {
        let stage = BuildStage::BrowserEngine;
        let version = &state.plan.latest.browser_engine;
        if self.chromium_cached(version)? {
            tracing::info!("Chromium {} already built, skipping", version);
            return Ok(());
        }
        let version_code = chromium_version_code(version).ok_or_else(|| StageError::Invalid {
            stage: stage.name(),
            message: format!("cannot derive a version code from chromium {}", version),
        })?;
        tracing::info!("Building chromium {}", version);

        let root = &self.workspace.chromium;
        let src = root.join("src");
        let path = path_with(&[self.workspace.depot_tools()]);
        fs::create_dir_all(root).map_err(io_err(stage))?;

        if !src.is_dir() {
            self.command(
                stage,
                &CommandSpec::new("fetch")
                    .args(["--nohooks", "android"])
                    .cwd(root)
                    .env("PATH", path.as_str()),
            )?;
        }
        self.retried(
            stage,
            &self.retry,
            &CommandSpec::new("git").args(["fetch", "origin"]).cwd(&src),
        )?;
        self.command(
            stage,
            &CommandSpec::new("git")
                .args(["checkout", version.as_str(), "-f"])
                .cwd(&src),
        )?;

        let gclient = RetryPolicy {
            max_attempts: GCLIENT_ATTEMPTS,
            ..self.retry.clone()
        };
        self.retried(
            stage,
            &gclient,
            &CommandSpec::shell("yes | gclient sync --with_branch_heads --jobs 32 -RDf")
                .cwd(&src)
                .env("PATH", path.as_str()),
        )?;
        self.command(stage, &CommandSpec::new("git").args(["clean", "-dff"]).cwd(&src))?;
        self.command(
            stage,
            &CommandSpec::new("git").args(["checkout", "--", "."]).cwd(&src),
        )?;

        let out = src.join("out/Default");
        fs::create_dir_all(&out).map_err(io_err(stage))?;
        fs::write(out.join("args.gn"), args_gn(version, &version_code)).map_err(io_err(stage))?;
        self.command(
            stage,
            &CommandSpec::new("gn")
                .args(["gen", "out/Default"])
                .cwd(&src)
                .env("PATH", path.as_str()),
        )?;

        for (target, apk, key) in CHROMIUM_TARGETS {
            tracing::info!("Building chromium {} target", target);
            self.command(
                stage,
                &CommandSpec::new("autoninja")
                    .args(["-C", "out/Default/", target])
                    .cwd(&src)
                    .env("PATH", path.as_str()),
            )?;
            let built = out.join("apks").join(apk);
            if !built.is_file() {
                return Err(StageError::MissingOutput {
                    stage: stage.name(),
                    path: built,
                });
            }
            self.store.put_file(key, &built)?;
        }
        self.store.put_string(layout::CHROMIUM_BUILT_REVISION, version)?;
        Ok(())
    }

    pub(super) fn app_store_client(&self, state: &BuildRunState) -> Result<(), StageError> {
        let stage = BuildStage::AppStoreClient;
        let client = &self.workspace.fdroid;
        let version = &state.plan.latest.app_store_client;

        let clone = CommandSpec::new("git")
            .args(["clone", FDROID_CLIENT_URL])
            .arg(client.to_string_lossy());
        self.retry
            .run("git clone fdroidclient", |_| {
                if client.exists() {
                    fs::remove_dir_all(client)?;
                }
                if let Some(parent) = client.parent() {
                    fs::create_dir_all(parent)?;
                }
                self.runner.run(&clone)
            })
            .map_err(|source| StageError::Command {
                stage: stage.name(),
                source,
            })?;

        let properties = format!("sdk.dir={}\n", self.workspace.sdk().display());
        for file in ["local.properties", "app/local.properties"] {
            let path = client.join(file);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(io_err(stage))?;
            }
            fs::write(&path, &properties).map_err(io_err(stage))?;
        }

        self.command(
            stage,
            &CommandSpec::new("git").args(["checkout", version.as_str()]).cwd(client),
        )?;
        self.retried(
            stage,
            &self.retry,
            &CommandSpec::new("./gradlew").arg("assembleRelease").cwd(client),
        )?;

        let built = client.join(FDROID_APK);
        if !built.is_file() {
            return Err(StageError::MissingOutput {
                stage: stage.name(),
                path: built,
            });
        }
        let dest = self.workspace.tree.join("packages/apps/F-Droid/F-Droid.apk");
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(io_err(stage))?;
        }
        fs::copy(&built, &dest).map_err(io_err(stage))?;
        Ok(())
    }

    pub(super) fn browser_integration(&self) -> Result<(), StageError> {
        let stage = BuildStage::BrowserIntegration;
        let tree = &self.workspace.tree;
        let targets = [
            (
                layout::CHROMIUM_WEBVIEW_APK,
                tree.join("external/chromium-webview/prebuilt/arm64/webview.apk"),
            ),
            (
                layout::CHROMIUM_BROWSER_APK,
                tree.join("external/chromium/prebuilt/arm64/ChromeModernPublic.apk"),
            ),
        ];
        for (key, dest) in targets {
            if !self.store.get_file(key, &dest)? {
                return Err(StageError::MissingState {
                    stage: stage.name(),
                    what: "built chromium APK",
                });
            }
        }
        Ok(())
    }
}
