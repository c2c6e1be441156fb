//! localstack CLI
//!
//! Entry point for the `localstack` host command.

use clap::{Parser, Subcommand};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use localstack::config::default_config_path;
use localstack::container::{BUILDER_BINARY, SOCKET_PATH};
use localstack::deploy::supported_devices_output;
use localstack::{
    build, container_command, deploy, BuildOutcome, DeployOptions, EffectiveConfig,
    LocalstackError, Orchestrator, PodmanRuntime, RuntimeDaemon, StateLayout,
};
use localstack_builder::{logging, HttpMetadataSource, RetryPolicy, SystemRunner};
use localstack_model::BuildConfig;

#[derive(Parser)]
#[command(name = "localstack")]
#[command(about = "Build a custom Android OS image in a local container", version)]
struct Cli {
    /// Config file (default: ~/.config/localstack/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a one-shot build
    Build {
        /// Skip version checks and force a complete rebuild
        #[arg(long, short = 'f')]
        force: bool,

        /// Platform build id to build instead of the latest
        #[arg(long)]
        aosp_build: Option<String>,

        /// Platform branch to sync instead of the latest
        #[arg(long)]
        aosp_branch: Option<String>,
    },

    /// Validate the config and build the container image
    Deploy {
        /// Device to build for (e.g. crosshatch); `list` prints supported devices
        #[arg(long, short = 'd')]
        device: Option<String>,

        /// Pin a chromium version (e.g. 90.0.4430.1) instead of latest stable
        #[arg(long)]
        chromium_version: Option<String>,

        /// Save the merged settings to the config file
        #[arg(long)]
        save_config: bool,

        /// Do not ask for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// List supported devices
    Devices,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    if let Err(e) = ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            eprintln!("\nReceived second interrupt, exiting immediately...");
            process::exit(130);
        }
        eprintln!("\nReceived interrupt signal, waiting for the build container to stop...");
    }) {
        tracing::warn!("Failed to install interrupt handler: {}", e);
    }

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let result = match cli.command {
        Commands::Devices => {
            println!("{}", supported_devices_output());
            Ok(())
        }
        Commands::Deploy {
            device,
            chromium_version,
            save_config,
            yes,
        } => run_deploy(
            &config_path,
            device,
            chromium_version,
            save_config,
            yes,
            cli.verbose,
        ),
        Commands::Build {
            force,
            aosp_build,
            aosp_branch,
        } => run_build(&config_path, force, aosp_build, aosp_branch),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        if interrupted.load(Ordering::SeqCst) {
            eprintln!("Interrupted");
        }
        process::exit(e.exit_code());
    }
}

fn run_deploy(
    config_path: &Path,
    device: Option<String>,
    chromium_version: Option<String>,
    save_config: bool,
    yes: bool,
    verbose: bool,
) -> Result<(), LocalstackError> {
    if device.as_deref() == Some("list") {
        println!("Valid devices are: {}", supported_devices_output());
        return Ok(());
    }

    let mut overrides = serde_json::Map::new();
    if let Some(device) = device {
        overrides.insert("device".to_string(), device.into());
    }
    if let Some(version) = chromium_version {
        overrides.insert("chromium_version".to_string(), version.into());
    }
    let effective = EffectiveConfig::build(Some(config_path), Some(overrides.into()))?;

    let options = DeployOptions {
        save_config: save_config.then(|| config_path.to_path_buf()),
        verbose,
    };
    let builder_binary = env::current_exe()?.with_file_name(BUILDER_BINARY);

    let daemon = RuntimeDaemon::start(Path::new(SOCKET_PATH))?;
    let runner = SystemRunner::new();
    let runtime = PodmanRuntime::new(&runner, daemon.socket());
    let record = deploy(&effective, &runtime, &builder_binary, &options, |config| {
        yes || confirm(config)
    });
    daemon.shutdown();

    let record = record?;
    println!("Deployed {} for {} ({})", record.image, record.device, record.deploy_id);
    Ok(())
}

fn run_build(
    config_path: &Path,
    force: bool,
    aosp_build: Option<String>,
    aosp_branch: Option<String>,
) -> Result<(), LocalstackError> {
    let mut overrides = serde_json::Map::new();
    if let Some(build_id) = aosp_build {
        overrides.insert("aosp_build".to_string(), build_id.into());
    }
    if let Some(branch) = aosp_branch {
        overrides.insert("aosp_branch".to_string(), branch.into());
    }
    let effective = EffectiveConfig::build(Some(config_path), Some(overrides.into()))?;
    let config = effective.to_build_config()?;
    let source = HttpMetadataSource::new(RetryPolicy::default())?;

    let outcome = build(&config, force, &source, |plan| {
        tracing::info!("Starting build {} for {}", plan.run_id, plan.device);
        let daemon = RuntimeDaemon::start(Path::new(SOCKET_PATH))?;
        let runner = SystemRunner::new();
        let runtime = PodmanRuntime::new(&runner, daemon.socket());
        let orchestrator = Orchestrator::new(&runtime, StateLayout::new(&config.state_dir).release_dir());
        let result = orchestrator.run(&container_command(), &[]);
        daemon.shutdown();
        result.map_err(LocalstackError::from)
    })?;

    match outcome {
        BuildOutcome::UpToDate => println!("No build required"),
        BuildOutcome::Built(plan) => println!("Build {} finished for {}", plan.build_number(), plan.device),
    }
    Ok(())
}

/// Print the settings and ask once
fn confirm(config: &BuildConfig) -> bool {
    match config.to_json() {
        Ok(json) => println!("Current settings:\n{}", json),
        Err(e) => tracing::warn!("Failed to render settings: {}", e),
    }
    print!("Do you want to continue [y/N]? ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
