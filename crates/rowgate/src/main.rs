//! RowGate - Row-level authorization gate
//!
//! Command line companion:
//! - `demo` replays the blog walkthrough and prints what each user saw
//! - `check-config` validates a configuration file
//! - `version` prints version information

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use rowgate::demo::{self, Outcome};
use rowgate_common::telemetry::init_tracing;
use rowgate_common::Config;

mod config;

#[derive(Parser)]
#[command(name = "rowgate")]
#[command(author, version, about = "RowGate - row-level authorization gate", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "ROWGATE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the blog walkthrough
    Demo {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a configuration file and print the effective settings
    CheckConfig {
        /// File to validate (TOML or JSON)
        path: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref()).await?;
    init_tracing(&config.telemetry)?;

    match cli.command {
        Commands::Demo { json } => {
            info!("Running blog walkthrough");
            let report = demo::run(config.gate).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for step in &report.steps {
                    let detail = match &step.outcome {
                        Outcome::Rows { rows } => format!("{} row(s) {}", rows.len(), serde_json::to_string(rows)?),
                        Outcome::Affected { rows_affected } => format!("{rows_affected} row(s) affected"),
                        Outcome::Denied { code, message } => format!("denied [{code}] {message}"),
                    };
                    println!(
                        "{} user {:<2} {:<26} {detail}",
                        step.at.format("%H:%M:%S%.3f"),
                        step.user,
                        step.action
                    );
                }
            }
        }

        Commands::CheckConfig { path } => {
            let checked = Config::load(&path).await?;
            println!("{path}: ok");
            println!("{}", serde_json::to_string_pretty(&checked)?);
        }

        Commands::Version => {
            println!("RowGate version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
