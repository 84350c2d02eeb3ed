//! OptiSync CLI
//!
//! Command-line tools for exercising the reconciliation engine.
//!
//! # Commands
//!
//! - `replay` - Run an edit script against in-memory remotes and print the
//!   resulting remote calls

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// OptiSync command-line tools.
#[derive(Parser)]
#[command(name = "optisync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay an edit script and print the remote call log
    Replay {
        /// Path to the JSON edit script
        script: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay { script, format } => {
            commands::replay::run(&script, &format)?;
        }
        Commands::Version => {
            println!("OptiSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
