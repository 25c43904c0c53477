//! Podium CLI - Command-line interface for the detection-model pipeline
//!
//! This CLI provides a `podium` command that fetches, validates and splits a
//! dataset, trains a detector, promotes it Champion/Challenger style and
//! serves the result.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::{models, pipeline, serve, ModelsCommand};

/// Podium - train, promote and serve object detectors
#[derive(Parser, Debug)]
#[command(
    name = "podium",
    author,
    version,
    about = "Podium - train, promote and serve object detectors",
    long_about = "Podium runs the detection-model pipeline: fetch an annotated dataset, validate and split it,\ntrain a detector, promote the best model to Champion, and serve it over HTTP."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// General settings file
    #[arg(long, global = true, default_value = podium_core::config::DEFAULT_SETTINGS_PATH)]
    settings: PathBuf,

    /// Secrets file
    #[arg(long, global = true, default_value = podium_core::config::DEFAULT_SECRETS_PATH)]
    secrets: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every stage: fetch, validate, split, train, promote
    Run,

    /// Download the dataset export and images into the data directory
    Fetch,

    /// Check that images and labels pair up and labels are well formed
    Validate,

    /// Split the dataset into train/val/test and write config.yaml
    Split {
        /// Shuffle seed (overrides data.split_seed)
        #[arg(long)]
        seed: Option<u64>,

        /// Test fraction (overrides data.test_size)
        #[arg(long)]
        test_size: Option<f64>,

        /// Validation fraction (overrides data.val_size)
        #[arg(long)]
        val_size: Option<f64>,
    },

    /// Train a detector inside a tracked run
    Train {
        /// Number of epochs (overrides training.epochs)
        #[arg(long)]
        epochs: Option<u32>,

        /// Device selector, e.g. cpu, 0, mps (overrides training.device)
        #[arg(long)]
        device: Option<String>,
    },

    /// Register the latest finished run and update Champion/Challenger
    Promote,

    /// Inspect the model registry
    #[command(subcommand)]
    Models(ModelsCommand),

    /// Serve a model over HTTP
    ///
    /// Uses --model, then serve.model_path, then the current Champion.
    Serve {
        /// Weights file to load
        #[arg(long)]
        model: Option<PathBuf>,

        /// Listen address (overrides serve.address)
        #[arg(long)]
        address: Option<SocketAddr>,
    },
}

fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    let level = match log_level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn dispatch(args: Args) -> anyhow::Result<()> {
    let mut settings = pipeline::load_settings(&args.settings, &args.secrets)?;

    match args.command {
        Command::Run => pipeline::run(&settings).await,
        Command::Fetch => pipeline::fetch(&settings).await,
        Command::Validate => pipeline::validate(&settings),
        Command::Split { seed, test_size, val_size } => {
            if let Some(seed) = seed {
                settings.data.split_seed = seed;
            }
            if let Some(test_size) = test_size {
                settings.data.test_size = test_size;
            }
            if let Some(val_size) = val_size {
                settings.data.val_size = val_size;
            }
            pipeline::split(&settings)
        }
        Command::Train { epochs, device } => {
            if let Some(epochs) = epochs {
                settings.training.epochs = epochs;
            }
            if let Some(device) = device {
                settings.training.device = device;
            }
            pipeline::train(&settings).await
        }
        Command::Promote => pipeline::promote(&settings),
        Command::Models(command) => models::execute(&settings, command),
        Command::Serve { model, address } => {
            if let Some(address) = address {
                settings.serve.address = address;
            }
            if model.is_some() {
                settings.serve.model_path = model;
            }
            serve::execute(&settings).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_tracing(&args.log_level) {
        eprintln!("{} failed to initialize logging: {e}", "warning:".yellow().bold());
    }

    match dispatch(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(commands::exit_code(&err))
        }
    }
}
