//! Signing key lifecycle
//!
//! Keys for a device live in `<keys_root>/<codename>`:
//! - An empty (or missing) directory gets a full bundle in one pass. The
//!   bundle is generated in a staging directory and renamed into place only
//!   when every key exists, so a failure never leaves a mixed bundle.
//! - A non-empty directory is never regenerated. The only change ever made
//!   to it is adding `networkstack` when that key is missing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use localstack_model::{DeviceProfile, SigningMode};

use crate::runner::{CommandRunner, CommandSpec, RunnerError};

/// Certificate subject for generated keys
pub const CERTIFICATE_SUBJECT: &str = "/CN=RattlesnakeOS";

/// Platform keys generated for every device
pub const PLATFORM_KEYS: [&str; 6] = [
    "releasekey",
    "platform",
    "shared",
    "media",
    "networkstack",
    "verity",
];

/// Key added to bundles created before it was required
pub const NETWORKSTACK_KEY: &str = "networkstack";

/// Key management errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("generating {key} failed: {source}")]
    Generation {
        key: String,
        #[source]
        source: RunnerError,
    },

    #[error("key generation finished without {}", join(.0))]
    Incomplete(Vec<String>),

    #[error("I/O error in key directory: {0}")]
    Io(#[from] io::Error),
}

fn join(names: &[String]) -> String {
    names.join(", ")
}

/// Key material for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBundle {
    /// Directory holding the keys
    pub dir: PathBuf,

    /// Signing mode the bundle was prepared for
    pub signing_mode: SigningMode,

    /// Whether the bundle was generated during this run
    pub generated: bool,

    /// Keys added by migration during this run
    pub migrated: Vec<String>,
}

impl KeyBundle {
    /// Path prefix of a named key (without extension)
    pub fn key(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// AVB private key
    pub fn avb_key(&self) -> PathBuf {
        self.dir.join("avb.pem")
    }

    /// Certificate of a named key
    pub fn certificate(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.x509.pem", name))
    }
}

/// Generates and migrates signing keys
pub struct KeyManager<'a> {
    runner: &'a dyn CommandRunner,
    keys_root: PathBuf,
    build_dir: PathBuf,
    subject: String,
}

impl<'a> KeyManager<'a> {
    pub fn new(runner: &'a dyn CommandRunner, keys_root: &Path, build_dir: &Path) -> Self {
        Self {
            runner,
            keys_root: keys_root.to_path_buf(),
            build_dir: build_dir.to_path_buf(),
            subject: CERTIFICATE_SUBJECT.to_string(),
        }
    }

    /// Directory for a device's keys
    pub fn device_dir(&self, codename: &str) -> PathBuf {
        self.keys_root.join(codename)
    }

    /// Make sure a complete bundle exists for the device
    pub fn ensure_keys(&self, profile: &DeviceProfile) -> Result<KeyBundle, KeyError> {
        let dir = self.device_dir(&profile.codename);
        let generated = if is_empty_dir(&dir)? {
            tracing::info!("No keys were found for {}, generating keys", profile.codename);
            self.generate(profile, &dir)?;
            true
        } else {
            tracing::info!("Keys already exist for {}", profile.codename);
            false
        };

        let mut migrated = Vec::new();
        if !dir.join(format!("{}.pk8", NETWORKSTACK_KEY)).exists() {
            tracing::info!("Did not find {} key, generating one", NETWORKSTACK_KEY);
            self.make_key(&dir, NETWORKSTACK_KEY)?;
            migrated.push(NETWORKSTACK_KEY.to_string());
        }

        Ok(KeyBundle {
            dir,
            signing_mode: profile.signing_mode,
            generated,
            migrated,
        })
    }

    fn generate(&self, profile: &DeviceProfile, dir: &Path) -> Result<(), KeyError> {
        fs::create_dir_all(&self.keys_root)?;
        let staging = self
            .keys_root
            .join(format!(".{}.staging", profile.codename));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        if let Err(e) = self.generate_into(profile, &staging) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        if dir.exists() {
            fs::remove_dir(dir)?;
        }
        fs::rename(&staging, dir)?;
        Ok(())
    }

    fn generate_into(&self, profile: &DeviceProfile, staging: &Path) -> Result<(), KeyError> {
        for key in PLATFORM_KEYS {
            self.make_key(staging, key)?;
        }
        if profile.signing_mode.uses_avb() {
            self.generate_avb_key(staging)?;
        } else {
            self.generate_verity_key(staging)?;
        }

        let missing: Vec<String> = expected_files(profile.signing_mode)
            .into_iter()
            .filter(|f| !staging.join(f).is_file())
            .collect();
        if !missing.is_empty() {
            return Err(KeyError::Incomplete(missing));
        }
        Ok(())
    }

    fn make_key(&self, dir: &Path, name: &str) -> Result<(), KeyError> {
        // make_key exits 1 on success
        let spec = CommandSpec::new(
            self.build_dir
                .join("development/tools/make_key")
                .to_string_lossy(),
        )
        .args([name, self.subject.as_str()])
        .cwd(dir)
        .stdin("\n")
        .accept_exit(1);
        self.run(name, &spec)
    }

    fn generate_avb_key(&self, dir: &Path) -> Result<(), KeyError> {
        let pem = dir.join("avb.pem");
        let pkmd = dir.join("avb_pkmd.bin");
        self.run(
            "avb",
            &CommandSpec::new("openssl")
                .args(["genrsa", "-out"])
                .arg(pem.to_string_lossy())
                .arg("2048")
                .cwd(&self.build_dir),
        )?;
        self.run(
            "avb_pkmd",
            &CommandSpec::new(self.build_dir.join("external/avb/avbtool").to_string_lossy())
                .args(["extract_public_key", "--key"])
                .arg(pem.to_string_lossy())
                .arg("--output")
                .arg(pkmd.to_string_lossy())
                .cwd(&self.build_dir),
        )
    }

    fn generate_verity_key(&self, dir: &Path) -> Result<(), KeyError> {
        let cert = dir.join("verity.x509.pem");
        self.run(
            "verity_key",
            &CommandSpec::new("make")
                .args(["-j", "20", "generate_verity_key"])
                .cwd(&self.build_dir),
        )?;
        self.run(
            "verity_key",
            &CommandSpec::new(
                self.build_dir
                    .join("out/host/linux-x86/bin/generate_verity_key")
                    .to_string_lossy(),
            )
            .arg("-convert")
            .arg(cert.to_string_lossy())
            .arg(dir.join("verity_key").to_string_lossy())
            .cwd(&self.build_dir),
        )?;
        self.run(
            "verity_key",
            &CommandSpec::new("make").arg("clobber").cwd(&self.build_dir),
        )?;
        self.run(
            "verity_user.der.x509",
            &CommandSpec::new("openssl")
                .args(["x509", "-outform", "der", "-in"])
                .arg(cert.to_string_lossy())
                .arg("-out")
                .arg(dir.join("verity_user.der.x509").to_string_lossy())
                .cwd(&self.build_dir),
        )
    }

    fn run(&self, key: &str, spec: &CommandSpec) -> Result<(), KeyError> {
        self.runner
            .run(spec)
            .map(|_| ())
            .map_err(|source| KeyError::Generation {
                key: key.to_string(),
                source,
            })
    }
}

/// Files a freshly generated bundle must contain
pub fn expected_files(mode: SigningMode) -> Vec<String> {
    let mut files: Vec<String> = PLATFORM_KEYS
        .iter()
        .flat_map(|k| [format!("{}.pk8", k), format!("{}.x509.pem", k)])
        .collect();
    if mode.uses_avb() {
        files.push("avb.pem".to_string());
        files.push("avb_pkmd.bin".to_string());
    } else {
        files.push("verity_user.der.x509".to_string());
    }
    files
}

fn is_empty_dir(dir: &Path) -> io::Result<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RecordingRunner;
    use tempfile::TempDir;

    /// Runner whose key tools create the files they would produce
    fn key_tools() -> RecordingRunner {
        RecordingRunner::new()
            .on("make_key", |spec| {
                let dir = spec.cwd.clone().unwrap_or_default();
                let name = &spec.args[0];
                fs::write(dir.join(format!("{}.pk8", name)), b"pk8")?;
                fs::write(dir.join(format!("{}.x509.pem", name)), b"pem")
            })
            .on("openssl genrsa", |spec| fs::write(&spec.args[2], b"rsa"))
            .on("avbtool", |spec| fs::write(&spec.args[4], b"pkmd"))
            .on("openssl x509", |spec| fs::write(&spec.args[6], b"der"))
    }

    #[test]
    fn test_generates_full_avb_bundle() {
        let tmp = TempDir::new().unwrap();
        let runner = key_tools();
        let manager = KeyManager::new(&runner, &tmp.path().join("keys"), tmp.path());

        let bundle = manager
            .ensure_keys(&DeviceProfile::resolve("crosshatch"))
            .unwrap();

        assert!(bundle.generated);
        assert!(bundle.migrated.is_empty());
        for file in expected_files(SigningMode::VbmetaChained) {
            assert!(bundle.dir.join(&file).is_file(), "missing {}", file);
        }
        assert_eq!(runner.count("make_key"), 6);
        assert_eq!(runner.count("generate_verity_key"), 0);
    }

    #[test]
    fn test_generates_verity_bundle_for_legacy_device() {
        let tmp = TempDir::new().unwrap();
        let runner = key_tools();
        let manager = KeyManager::new(&runner, &tmp.path().join("keys"), tmp.path());

        let bundle = manager.ensure_keys(&DeviceProfile::resolve("marlin")).unwrap();

        assert!(bundle.dir.join("verity_user.der.x509").is_file());
        assert!(!bundle.dir.join("avb.pem").exists());
        assert!(runner.position("make -j 20 generate_verity_key").is_some());
        assert!(runner.position("make clobber").is_some());
    }

    #[test]
    fn test_existing_bundle_is_not_regenerated() {
        let tmp = TempDir::new().unwrap();
        let keys = tmp.path().join("keys");
        let dir = keys.join("sargo");
        fs::create_dir_all(&dir).unwrap();
        for key in PLATFORM_KEYS {
            fs::write(dir.join(format!("{}.pk8", key)), b"old").unwrap();
        }

        let runner = key_tools();
        let manager = KeyManager::new(&runner, &keys, tmp.path());
        let bundle = manager.ensure_keys(&DeviceProfile::resolve("sargo")).unwrap();

        assert!(!bundle.generated);
        assert!(runner.commands().is_empty());
        assert_eq!(fs::read(dir.join("releasekey.pk8")).unwrap(), b"old");
    }

    #[test]
    fn test_networkstack_migration_only_when_absent() {
        let tmp = TempDir::new().unwrap();
        let keys = tmp.path().join("keys");
        let dir = keys.join("taimen");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("releasekey.pk8"), b"old").unwrap();

        let runner = key_tools();
        let manager = KeyManager::new(&runner, &keys, tmp.path());
        let bundle = manager.ensure_keys(&DeviceProfile::resolve("taimen")).unwrap();

        assert_eq!(bundle.migrated, vec![NETWORKSTACK_KEY]);
        assert_eq!(runner.count("make_key"), 1);
        assert!(dir.join("networkstack.pk8").is_file());
        assert_eq!(fs::read(dir.join("releasekey.pk8")).unwrap(), b"old");

        // second run is a no-op
        let bundle = manager.ensure_keys(&DeviceProfile::resolve("taimen")).unwrap();
        assert!(bundle.migrated.is_empty());
        assert_eq!(runner.count("make_key"), 1);
    }

    #[test]
    fn test_failed_generation_leaves_no_partial_bundle() {
        let tmp = TempDir::new().unwrap();
        let keys = tmp.path().join("keys");
        let runner = key_tools().fail_always("make_key media");
        let manager = KeyManager::new(&runner, &keys, tmp.path());

        let err = manager
            .ensure_keys(&DeviceProfile::resolve("blueline"))
            .unwrap_err();

        assert!(matches!(err, KeyError::Generation { ref key, .. } if key == "media"));
        assert!(!keys.join("blueline").exists());
        assert!(!keys.join(".blueline.staging").exists());
    }

    #[test]
    fn test_missing_output_is_incomplete() {
        let tmp = TempDir::new().unwrap();
        let keys = tmp.path().join("keys");
        // avbtool produces nothing
        let runner = RecordingRunner::new()
            .on("make_key", |spec| {
                let dir = spec.cwd.clone().unwrap_or_default();
                fs::write(dir.join(format!("{}.pk8", spec.args[0])), b"pk8")?;
                fs::write(dir.join(format!("{}.x509.pem", spec.args[0])), b"pem")
            })
            .on("openssl genrsa", |spec| fs::write(&spec.args[2], b"rsa"));
        let manager = KeyManager::new(&runner, &keys, tmp.path());

        let err = manager
            .ensure_keys(&DeviceProfile::resolve("walleye"))
            .unwrap_err();
        assert!(matches!(err, KeyError::Incomplete(ref missing) if missing == &vec!["avb_pkmd.bin".to_string()]));
        assert!(!keys.join("walleye").exists());
    }
}
