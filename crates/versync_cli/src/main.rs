//! Versync CLI
//!
//! Command-line tools for inspecting and repairing a Versync data directory.
//!
//! # Commands
//!
//! - `history` - List the versions of a file
//! - `show` - Print one version
//! - `diff` - Compare two versions
//! - `status` - Print sync status rows
//! - `offline` - List buffered offline edits of a user
//! - `rollback` - Restore an earlier version as a new one

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Versync command-line tools.
#[derive(Parser)]
#[command(name = "versync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
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
    /// List the versions of a file, newest first
    History {
        /// File id
        file: String,

        /// Maximum number of versions to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print one version of a file
    Show {
        /// File id
        file: String,

        /// Version id
        version: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Compare two versions of a file
    Diff {
        /// File id
        file: String,

        /// Older version id
        from: String,

        /// Newer version id
        to: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the sync status of one file, or of every file
    Status {
        /// File id
        file: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List the buffered offline edits of a user
    Offline {
        /// User id
        user: String,

        /// Discard the buffered edit for this file instead of listing
        #[arg(short, long)]
        discard: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Append a new version restoring an earlier one
    Rollback {
        /// File id
        file: String,

        /// Version id to restore
        version: String,

        /// User performing the rollback
        #[arg(short, long)]
        user: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::History {
            file,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Data path required for history")?;
            commands::history::run(&path, &file, limit, &format)?;
        }
        Commands::Show {
            file,
            version,
            format,
        } => {
            let path = cli.path.ok_or("Data path required for show")?;
            commands::show::run(&path, &file, &version, &format)?;
        }
        Commands::Diff {
            file,
            from,
            to,
            format,
        } => {
            let path = cli.path.ok_or("Data path required for diff")?;
            commands::diff::run(&path, &file, &from, &to, &format)?;
        }
        Commands::Status { file, format } => {
            let path = cli.path.ok_or("Data path required for status")?;
            commands::status::run(&path, file.as_deref(), &format)?;
        }
        Commands::Offline {
            user,
            discard,
            format,
        } => {
            let path = cli.path.ok_or("Data path required for offline")?;
            commands::offline::run(&path, &user, discard.as_deref(), &format)?;
        }
        Commands::Rollback {
            file,
            version,
            user,
            format,
        } => {
            let path = cli.path.ok_or("Data path required for rollback")?;
            commands::rollback::run(&path, &file, &version, &user, &format)?;
        }
        Commands::Version => {
            println!("Versync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Versync Engine v{}", versync_engine::VERSION);
        }
    }

    Ok(())
}
