//! Headless Delve runner.
//!
//! # Usage
//!
//! ```bash
//! # Run the demo cavern for 100 turns
//! cargo run -p delve_headless -- run --map crates/delve_headless/data/cavern.ron \
//!     --catalog crates/delve_headless/data/catalog.ron --turns 100
//!
//! # Check that a map plays out the same on every run
//! cargo run -p delve_headless -- verify --map crates/delve_headless/data/cavern.ron \
//!     --catalog crates/delve_headless/data/catalog.ron --runs 4
//! ```
//!
//! Output (stdout): one JSON report
//! Logs (stderr): human-readable tracing output

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use delve_headless::{run, Forager, RunConfig, RunError};

#[derive(Parser)]
#[command(name = "delve_headless")]
#[command(about = "Headless Delve turn runner for CI and soak testing")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Inputs {
    /// Map file (RON)
    #[arg(short, long)]
    map: PathBuf,

    /// Agent catalog file (RON)
    #[arg(short, long)]
    catalog: Option<PathBuf>,

    /// Simulation config file (RON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of turns to run
    #[arg(short, long, default_value = "100")]
    turns: u64,

    /// Worker threads (overrides the config file)
    #[arg(short, long)]
    workers: Option<usize>,
}

impl Inputs {
    fn into_run_config(self, save: Option<PathBuf>) -> RunConfig {
        RunConfig {
            map: self.map,
            catalog: self.catalog,
            config: self.config,
            turns: self.turns,
            workers: self.workers,
            save,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a map and print a JSON report
    Run {
        #[command(flatten)]
        inputs: Inputs,

        /// Save the final state as RON
        #[arg(short, long)]
        save: Option<PathBuf>,
    },

    /// Run a map several times and check every run ends in the same state
    Verify {
        #[command(flatten)]
        inputs: Inputs,

        /// Number of runs to compare
        #[arg(short, long, default_value = "2")]
        runs: usize,
    },
}

fn cmd_run(config: &RunConfig) -> Result<bool, RunError> {
    let report = run(config, &Forager)?;
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!("Failed to encode report: {e}"),
    }
    Ok(true)
}

fn cmd_verify(config: &RunConfig, runs: usize) -> Result<bool, RunError> {
    let mut hashes = Vec::with_capacity(runs);
    for index in 0..runs {
        let report = run(config, &Forager)?;
        tracing::info!(run = index, hash = report.state_hash, "Run finished");
        hashes.push(report.state_hash);
    }
    let consistent = hashes.windows(2).all(|w| w[0] == w[1]);
    if !consistent {
        tracing::warn!(?hashes, "Runs diverged");
    }
    println!(
        "{}",
        serde_json::json!({ "consistent": consistent, "hashes": hashes })
    );
    Ok(consistent)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the report
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(filter)
        .init();

    let result = match cli.command {
        Commands::Run { inputs, save } => cmd_run(&inputs.into_run_config(save)),
        Commands::Verify { inputs, runs } => cmd_verify(&inputs.into_run_config(None), runs),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
