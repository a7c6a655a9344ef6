//! ecogrid: run workloads through the EcoGrid scheduler.
//!
//! # Usage
//!
//! ```text
//! ecogrid run --workload demos/ecogrid/mixed.toml --config demos/ecogrid/scheduler.toml
//! ecogrid config --config demos/ecogrid/scheduler.toml
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use ecogrid_core::SchedulerConfig;

mod simulation;
mod workload;

#[derive(Parser)]
#[command(
    name = "ecogrid",
    about = "EcoGrid: energy-aware task scheduler",
    version,
    propagate_version = true
)]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a workload and print the final report as JSON.
    Run {
        /// Workload file (machines and tasks).
        #[arg(short, long)]
        workload: PathBuf,
        /// Scheduler configuration. Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the effective scheduler configuration as TOML.
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command {
        Commands::Run { workload, config } => run(&workload, config.as_deref()),
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| "info,ecogrid=debug".parse())?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SchedulerConfig> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading scheduler config");
            Ok(SchedulerConfig::from_file(path)?)
        }
        None => Ok(SchedulerConfig::default()),
    }
}

fn run(workload: &Path, config: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let workload = workload::Workload::from_file(workload)?;

    let summary = simulation::Simulation::new(workload, config).run();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
