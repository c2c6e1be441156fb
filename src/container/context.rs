//! Image build context
//!
//! Materializes the directory the build image is built from:
//! - `Dockerfile` and `build.sh`, rendered with tera
//! - the two dependency install scripts
//! - `build-config.json`, the immutable config the builder reads
//! - the `localstack-builder` binary
//!
//! The context digest covers every file so two deploys with the same
//! inputs produce the same digest.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};
use walkdir::WalkDir;

use localstack_model::{BuildConfig, ModelError};

use super::{BUILD_SCRIPT_PATH, CONFIG_PATH, KEEP_ALIVE_COMMAND, RELEASE_MOUNT};

const DOCKERFILE_TEMPLATE: &str = include_str!("../../templates/Dockerfile.tera");
const BUILD_SCRIPT_TEMPLATE: &str = include_str!("../../templates/build.sh.tera");
const INSTALL_BUILD_DEPS: &str = include_str!("../../assets/install-build-deps.sh");
const INSTALL_BUILD_DEPS_ANDROID: &str = include_str!("../../assets/install-build-deps-android.sh");

/// Builder binary name inside the context
pub const BUILDER_BINARY: &str = "localstack-builder";

/// Context errors
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("template error: {0}")]
    Template(String),

    #[error("builder binary not found at {0:?}")]
    MissingBuilder(PathBuf),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

#[derive(Serialize)]
struct TemplateContext<'a> {
    name: &'a str,
    device: &'a str,
    stack_version: &'a str,
    config_path: &'a str,
    script_path: &'a str,
    release_dir: &'a str,
    keep_alive: &'a [&'a str],
    verbose: bool,
}

/// A materialized build context
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub dir: PathBuf,
    /// SHA-256 over relative paths and contents, in path order
    pub digest: String,
}

impl BuildContext {
    /// Write every context file into `dir`
    pub fn materialize(
        dir: &Path,
        config: &BuildConfig,
        builder_binary: &Path,
        verbose: bool,
    ) -> Result<Self, ContextError> {
        if !builder_binary.is_file() {
            return Err(ContextError::MissingBuilder(builder_binary.to_path_buf()));
        }
        fs::create_dir_all(dir)?;

        let vars = TemplateContext {
            name: &config.name,
            device: &config.device,
            stack_version: &config.stack_version,
            config_path: CONFIG_PATH,
            script_path: BUILD_SCRIPT_PATH,
            release_dir: RELEASE_MOUNT,
            keep_alive: &KEEP_ALIVE_COMMAND,
            verbose,
        };
        fs::write(dir.join("Dockerfile"), render("Dockerfile", DOCKERFILE_TEMPLATE, &vars)?)?;
        write_script(&dir.join("build.sh"), &render("build.sh", BUILD_SCRIPT_TEMPLATE, &vars)?)?;
        write_script(&dir.join("install-build-deps.sh"), INSTALL_BUILD_DEPS)?;
        write_script(&dir.join("install-build-deps-android.sh"), INSTALL_BUILD_DEPS_ANDROID)?;
        config.write_to_file(&dir.join("build-config.json"))?;

        let binary = dir.join(BUILDER_BINARY);
        fs::copy(builder_binary, &binary)?;
        set_executable(&binary)?;

        let digest = digest_dir(dir)?;
        tracing::debug!("Build context {} digest {}", dir.display(), digest);
        Ok(Self {
            dir: dir.to_path_buf(),
            digest,
        })
    }
}

fn render(name: &str, template: &str, vars: &TemplateContext<'_>) -> Result<String, ContextError> {
    let mut tera = Tera::default();
    tera.add_raw_template(name, template)
        .map_err(|e| ContextError::Template(format!("failed to parse {}: {}", name, e)))?;
    let context = Context::from_serialize(vars)
        .map_err(|e| ContextError::Template(format!("failed to build context: {}", e)))?;
    tera.render(name, &context)
        .map_err(|e| ContextError::Template(format!("failed to render {}: {}", name, e)))
}

fn write_script(path: &Path, content: &str) -> Result<(), ContextError> {
    fs::write(path, content)?;
    set_executable(path)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), ContextError> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), ContextError> {
    Ok(())
}

/// Digest of every regular file under `dir`
pub fn digest_dir(dir: &Path) -> Result<String, ContextError> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(fs::read(entry.path())?);
    }
    Ok(hex::encode(hasher.finalize()))
}
