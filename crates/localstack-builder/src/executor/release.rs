//! Compile, sign and package a release

use std::fs;
use std::path::{Path, PathBuf};

use localstack_model::SigningMode;

use crate::customize::TextEdit;
use crate::keys::KeyBundle;
use crate::publish::BuildArtifactSet;
use crate::run::BuildRunState;
use crate::runner::CommandSpec;

use super::{io_err, path_with, BuildStage, Executor, StageError};

/// Factory image script shipped in the device tree
pub const FACTORY_SCRIPT: &str = "device/common/generate-factory-images-common.sh";

const RELEASETOOLS: &str = "build/tools/releasetools";
const AVB_ALGORITHM: &str = "SHA256_RSA2048";

/// `sign_target_files_apks` switches for a signing mode
pub fn signing_flags(mode: SigningMode, key_dir: &Path) -> Vec<String> {
    let key = |name: &str| key_dir.join(name).to_string_lossy().into_owned();
    let mut flags: Vec<String> = Vec::new();
    match mode {
        SigningMode::VerityOnly => {
            flags.extend([
                "--replace_verity_public_key".to_string(),
                key("verity_key.pub"),
                "--replace_verity_private_key".to_string(),
                key("verity"),
                "--replace_verity_keyid".to_string(),
                key("verity.x509.pem"),
            ]);
        }
        SigningMode::VbmetaSimple | SigningMode::VbmetaChained => {
            flags.extend([
                "--avb_vbmeta_key".to_string(),
                key("avb.pem"),
                "--avb_vbmeta_algorithm".to_string(),
                AVB_ALGORITHM.to_string(),
            ]);
            if mode == SigningMode::VbmetaChained {
                flags.extend([
                    "--avb_system_key".to_string(),
                    key("avb.pem"),
                    "--avb_system_algorithm".to_string(),
                    AVB_ALGORITHM.to_string(),
                ]);
            }
        }
    }
    flags
}

/// `require version-<name>=<value>` from vendor-board-info.txt, lowercased
fn board_requirement(info: &str, name: &str) -> Option<String> {
    let prefix = format!("require version-{}=", name);
    info.lines()
        .find_map(|l| l.trim().strip_prefix(prefix.as_str()))
        .map(|v| v.trim().to_lowercase())
}

/// `BUILD_ID` from build_id.mk, lowercased
fn build_id(makefile: &str) -> Option<String> {
    makefile.lines().find_map(|l| {
        let value = l.trim().strip_prefix("BUILD_ID=")?.trim();
        (!value.is_empty()).then(|| value.to_lowercase())
    })
}

impl Executor<'_> {
    /// Command run inside the platform build environment
    fn build_env(&self, state: &BuildRunState, command: &str) -> CommandSpec {
        CommandSpec::shell(format!(
            "source build/envsetup.sh && choosecombo release {} {} && {}",
            state.profile.build_product(),
            self.config.build_type,
            command
        ))
        .cwd(&self.workspace.tree)
        .env("BUILD_NUMBER", state.build_number.as_str())
        .env("DISPLAY_BUILD_NUMBER", "true")
        .env("LANG", "C")
        .env("_JAVA_OPTIONS", "-XX:-UsePerfData")
    }

    fn releasetool(&self, name: &str) -> String {
        self.workspace
            .tree
            .join(RELEASETOOLS)
            .join(name)
            .to_string_lossy()
            .into_owned()
    }

    fn artifacts(&self, state: &BuildRunState) -> BuildArtifactSet {
        BuildArtifactSet::for_build(
            &self.workspace.tree,
            &state.profile.codename,
            &state.build_number,
            state.plan.build_timestamp(),
        )
    }

    fn keys<'s>(&self, stage: BuildStage, state: &'s BuildRunState) -> Result<&'s KeyBundle, StageError> {
        state.keys.as_ref().ok_or(StageError::MissingState {
            stage: stage.name(),
            what: "key bundle",
        })
    }

    fn expect_output(&self, stage: BuildStage, path: PathBuf) -> Result<(), StageError> {
        if path.is_file() {
            Ok(())
        } else {
            Err(StageError::MissingOutput {
                stage: stage.name(),
                path,
            })
        }
    }

    pub(super) fn compile(&self, state: &BuildRunState) -> Result<(), StageError> {
        let stage = BuildStage::Compile;
        let out = self.workspace.tree.join("out");
        if out.exists() {
            fs::remove_dir_all(&out).map_err(io_err(stage))?;
        }
        tracing::info!("BUILD_NUMBER={}", state.build_number);
        self.command(
            stage,
            &self.build_env(
                state,
                &format!("make -j {} target-files-package", self.config.nproc),
            ),
        )?;
        Ok(())
    }

    pub(super) fn packaging(&self, state: &BuildRunState) -> Result<(), StageError> {
        self.command(
            BuildStage::Packaging,
            &self.build_env(
                state,
                &format!("make -j {} brillo_update_payload", self.config.nproc),
            ),
        )?;
        Ok(())
    }

    pub(super) fn signing(&self, state: &mut BuildRunState) -> Result<(), StageError> {
        let stage = BuildStage::Signing;
        let device = state.profile.codename.clone();
        let artifacts = self.artifacts(state);
        let keys = self.keys(stage, state)?;
        fs::create_dir_all(&artifacts.release_dir).map_err(io_err(stage))?;

        let unsigned = self
            .workspace
            .tree
            .join("out/target/product")
            .join(&device)
            .join("obj/PACKAGING/target_files_intermediates")
            .join(format!("aosp_{}-target_files-{}.zip", device, state.build_number));

        let spec = CommandSpec::new(self.releasetool("sign_target_files_apks"))
            .args(["-o", "-d"])
            .arg(keys.dir.to_string_lossy())
            .arg("-k")
            .arg(format!(
                "build/target/product/security/networkstack={}",
                keys.key("networkstack").display()
            ))
            .args(signing_flags(keys.signing_mode, &keys.dir))
            .arg(unsigned.to_string_lossy())
            .arg(artifacts.target_files.to_string_lossy())
            .cwd(&self.workspace.tree)
            .env(
                "PATH",
                path_with(&[self.workspace.tree.join("prebuilts/build-tools/linux-x86/bin")]),
            );
        tracing::info!("Running sign_target_files_apks");
        self.command(stage, &spec)?;
        self.expect_output(stage, artifacts.target_files.clone())?;
        state.artifacts = Some(artifacts);
        Ok(())
    }

    pub(super) fn ota_generation(&self, state: &BuildRunState) -> Result<(), StageError> {
        let stage = BuildStage::OtaGeneration;
        let artifacts = self.artifacts(state);
        let keys = self.keys(stage, state)?;

        let spec = CommandSpec::new(self.releasetool("ota_from_target_files"))
            .args(["--block", "-k"])
            .arg(keys.key("releasekey").to_string_lossy())
            .args(state.profile.extra_ota_flags.iter().cloned())
            .arg(artifacts.target_files.to_string_lossy())
            .arg(artifacts.ota_package.to_string_lossy())
            .cwd(&self.workspace.tree);
        tracing::info!("Running ota_from_target_files");
        self.command(stage, &spec)?;
        self.expect_output(stage, artifacts.ota_package)
    }

    pub(super) fn image_generation(&self, state: &BuildRunState) -> Result<(), StageError> {
        let stage = BuildStage::ImageGeneration;
        let artifacts = self.artifacts(state);
        let tree = &self.workspace.tree;

        TextEdit::replace(
            format!("{}/img_from_target_files.py", RELEASETOOLS),
            "zipfile.ZIP_DEFLATED",
            "zipfile.ZIP_STORED",
        )
        .apply(tree)
        .map_err(io_err(stage))?;

        let image = artifacts.release_dir.join(format!(
            "{}-img-{}.zip",
            state.profile.codename, state.build_number
        ));
        tracing::info!("Running img_from_target_files");
        self.command(
            stage,
            &CommandSpec::new(self.releasetool("img_from_target_files"))
                .arg(artifacts.target_files.to_string_lossy())
                .arg(image.to_string_lossy())
                .cwd(tree),
        )?;
        self.expect_output(stage, image)
    }

    pub(super) fn factory_image(&self, state: &BuildRunState) -> Result<(), StageError> {
        let stage = BuildStage::FactoryImage;
        let tree = &self.workspace.tree;
        let device = &state.profile.codename;
        let number = &state.build_number;
        let artifacts = self.artifacts(state);

        let board_info = fs::read_to_string(
            tree.join("vendor/google_devices")
                .join(device)
                .join("vendor-board-info.txt"),
        )
        .map_err(io_err(stage))?;
        let invalid = |message: &str| StageError::Invalid {
            stage: stage.name(),
            message: message.to_string(),
        };
        let bootloader = board_requirement(&board_info, "bootloader")
            .ok_or_else(|| invalid("no bootloader version in vendor-board-info.txt"))?;
        let radio = board_requirement(&board_info, "baseband")
            .ok_or_else(|| invalid("no baseband version in vendor-board-info.txt"))?;
        let version = fs::read_to_string(tree.join("build/core/build_id.mk"))
            .map_err(io_err(stage))
            .and_then(|mk| build_id(&mk).ok_or_else(|| invalid("no BUILD_ID in build_id.mk")))?;

        // The factory script zips, we want an uncompressed tar for xz
        for edit in [
            TextEdit::replace(FACTORY_SCRIPT, "zip -r", "tar cvf"),
            TextEdit::replace(FACTORY_SCRIPT, "factory.zip", "factory.tar"),
            TextEdit::delete_lines_starting(FACTORY_SCRIPT, "mv "),
        ] {
            edit.apply(tree).map_err(io_err(stage))?;
        }

        tracing::info!("Running generate-factory-images");
        self.command(
            stage,
            &CommandSpec::shell(format!("source {}", tree.join(FACTORY_SCRIPT).display()))
                .cwd(&artifacts.release_dir)
                .env("DEVICE", device.as_str())
                .env("PRODUCT", device.as_str())
                .env("PREFIX", "aosp_")
                .env("BUILD", number.as_str())
                .env("VERSION", version.as_str())
                .env("BOOTLOADER", bootloader.as_str())
                .env("RADIO", radio.as_str())
                .env(
                    "TARGET_FILES",
                    format!("{}-target_files-{}.zip", device, number),
                ),
        )?;

        let generated = artifacts
            .release_dir
            .join(format!("{}-{}-factory.tar", device, version));
        let tar = artifacts
            .release_dir
            .join(format!("{}-factory-{}.tar", device, number));
        if !generated.is_file() {
            return Err(StageError::MissingOutput {
                stage: stage.name(),
                path: generated,
            });
        }
        fs::rename(&generated, &tar).map_err(io_err(stage))?;
        if artifacts.factory_image.exists() {
            fs::remove_file(&artifacts.factory_image).map_err(io_err(stage))?;
        }

        tracing::info!("Compressing factory image with pxz");
        self.command(
            stage,
            &CommandSpec::new("pxz")
                .args(["-v", "-T0", "-9", "-z"])
                .arg(tar.to_string_lossy())
                .cwd(&artifacts.release_dir),
        )?;
        self.expect_output(stage, artifacts.factory_image)
    }
}
