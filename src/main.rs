//! seispar CLI
//!
//! Run a per-station transform over seismic recordings in parallel.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use seispar::config::SAMPLE_CONFIG;
use seispar::{build_runtime, init_rayon, plan_job, run_job, Config, Strategy};

#[derive(Parser)]
#[command(name = "seispar")]
#[command(about = "Station-parallel processing of seismic recordings", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override the number of workers / ranks
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Override the dispatch strategy (pool, collective, auto)
    #[arg(short, long, global = true)]
    strategy: Option<Strategy>,

    /// Log dispatch progress at info level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job (default if no command specified)
    Run,

    /// Show the station assignment per bucket without processing
    Plan,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            let config = load_config(&cli)?;
            run_command(config)?;
        }

        Some(Commands::Plan) => {
            let config = load_config(&cli)?;
            plan_command(&config)?;
        }

        Some(Commands::Validate) => {
            let config = load_config(&cli)?;
            config.validate()?;
            println!("Configuration is valid");
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

/// Load the config file and apply command-line overrides.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_file(&cli.config)?;

    if let Some(workers) = cli.workers {
        config.processing.workers = workers;
    }
    if let Some(strategy) = cli.strategy {
        config.processing.strategy = strategy;
    }
    if cli.verbose {
        config.processing.verbose = true;
    }

    Ok(config)
}

fn run_command(config: Config) -> Result<()> {
    config.validate()?;

    // Initialize Rayon
    init_rayon(config.processing.rayon_threads)?;

    // Build and run Tokio runtime
    let runtime = build_runtime(config.processing.worker_threads)?;
    let report = runtime.block_on(async { run_job(&config).await })?;

    tracing::info!("Job complete: {}", report);
    Ok(())
}

fn plan_command(config: &Config) -> Result<()> {
    init_rayon(config.processing.rayon_threads)?;

    // `auto` probes the runtime, so plan inside the one `run` would use
    let runtime = build_runtime(config.processing.worker_threads)?;
    let _guard = runtime.enter();
    let plan = plan_job(config)?;

    println!("\n=== Partition Plan ({} strategy) ===", plan.strategy);
    println!("{}", plan);
    println!("====================================\n");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    std::fs::write(&output, SAMPLE_CONFIG)?;
    println!("Generated sample configuration at: {}", output.display());
    Ok(())
}
