//! FieldSync CLI
//!
//! Command-line tools for the FieldSync client stores.
//!
//! # Commands
//!
//! - `inspect` - Display queue and cache statistics
//! - `dump` - List queued mutations for debugging
//! - `compact` - Rewrite the logs to reclaim space
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// FieldSync command-line store tools.
#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display queue and cache statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List queued mutations for debugging
    Dump {
        /// Only show dead-lettered mutations
        #[arg(short, long)]
        dead_letters: bool,

        /// Maximum number of mutations to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rewrite the logs to reclaim space
    Compact {
        /// Compact only the queue log
        #[arg(short, long)]
        queue: bool,

        /// Compact only the cache log
        #[arg(short, long)]
        cache: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Dump {
            dead_letters,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for dump")?;
            commands::dump::run(&path, dead_letters, limit, &format)?;
        }
        Commands::Compact { queue, cache } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            let both = !queue && !cache;
            commands::compact::run(&path, queue || both, cache || both)?;
        }
        Commands::Version => {
            println!("FieldSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
