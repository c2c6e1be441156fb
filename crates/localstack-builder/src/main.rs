//! localstack-builder CLI
//!
//! Entry point inside the build container.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use localstack_builder::{logging, run_build, BuildError, Executor, FsBlobStore, SystemRunner, Workspace};
use localstack_model::{BuildConfig, BuildPlan};

#[derive(Parser)]
#[command(name = "localstack-builder")]
#[command(about = "Build agent running inside the localstack container", version)]
struct Cli {
    /// Debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every build stage for a plan
    Run {
        /// Build plan written by the host
        #[arg(long)]
        plan: PathBuf,

        /// Build configuration rendered at deploy time
        #[arg(long)]
        config: PathBuf,

        /// Release store root
        #[arg(long, default_value = "/release")]
        release: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let code = match cli.command {
        Commands::Run {
            plan,
            config,
            release,
        } => match run(&plan, &config, release) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("Error: {}", e);
                e.exit_code()
            }
        },
    };
    process::exit(code);
}

fn run(plan: &Path, config: &Path, release: PathBuf) -> Result<(), BuildError> {
    let plan = BuildPlan::from_file(plan)?;
    let config = BuildConfig::from_file(config)?;
    let runner = SystemRunner::new();
    let store = FsBlobStore::new(release);
    let executor = Executor::new(&runner, &store, &config, Workspace::container());
    run_build(plan, &config, &executor, &runner)?;
    Ok(())
}
