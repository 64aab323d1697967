//! Vigil CLI
//!
//! Command-line driver for the Vigil telemetry pipeline.
//!
//! # Usage
//!
//! ```bash
//! vigil --help
//! vigil config
//! vigil simulate --events 5000 --operations 20 --error-rate 0.05
//! ```

#![deny(unsafe_code)]

mod simulate;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pipeline::config::{Environment, PipelineConfig};
use simulate::SimulateArgs;

/// Vigil CLI - Adaptive telemetry pipeline driver
#[derive(Parser)]
#[command(name = "vigil")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Deployment environment (development, staging, production)
    #[arg(short, long, env = "VIGIL_ENVIRONMENT")]
    environment: Option<Environment>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic workload through a pipeline and print its statistics
    Simulate(SimulateArgs),
    /// Print the effective configuration
    Config,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(environment: Option<Environment>) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env()?;
    if let Some(environment) = environment {
        config.environment = environment;
    }
    config.validate_config()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Some(Commands::Simulate(args)) => {
            let config = load_config(cli.environment)?;
            let summary = simulate::run(config, &args).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Some(Commands::Config) => {
            let config = load_config(cli.environment)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        None => {
            println!("Vigil CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for usage information");
        }
    }

    Ok(())
}
