//! # Axiom CLI Module
//!
//! This module implements the CLI interface for Axiom.
//!
//! ## Available Commands
//!
//! - `run` - Run a script, optionally in real time with a journal
//! - `validate` - Check a configuration file
//! - `checksum` - Run a script and print the BLAKE3 hash of the final state

mod commands;

use axiom_core::AxiomError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Axiom - semantic physics engine
///
/// Tokens drift, attract and fire under local forces; co-activation becomes
/// structure.
#[derive(Parser, Debug)]
#[command(name = "axiom")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Engine configuration (TOML). Defaults apply when absent.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a script
    Run {
        /// Path to the script (JSON)
        #[arg(short, long)]
        script: PathBuf,

        /// Ticks to run (defaults to the script's own count)
        #[arg(short, long)]
        ticks: Option<u64>,

        /// Pace ticks by the configured tick interval; Ctrl-C stops
        #[arg(long)]
        realtime: bool,

        /// Append committed mutations to this file as JSON lines
        #[arg(short, long)]
        journal: Option<PathBuf>,

        /// Start from a snapshot instead of seeding
        #[arg(long)]
        restore: Option<PathBuf>,

        /// Write the final snapshot here
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Validate a configuration file
    Validate,

    /// Run a script headless and print the final state hash
    Checksum {
        /// Path to the script (JSON); an empty run when absent
        #[arg(short, long)]
        script: Option<PathBuf>,

        /// Ticks to run (defaults to the script's own count)
        #[arg(short, long)]
        ticks: Option<u64>,

        /// Start from a snapshot instead of seeding
        #[arg(long)]
        restore: Option<PathBuf>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), AxiomError> {
    let config = load_config(cli.config.as_deref())?;
    let json_mode = cli.json_mode;

    match cli.command {
        Commands::Run {
            script,
            ticks,
            realtime,
            journal,
            restore,
            snapshot,
        } => {
            cmd_run(
                config,
                RunArgs {
                    script,
                    ticks,
                    realtime,
                    journal,
                    restore,
                    snapshot,
                },
                json_mode,
            )
            .await
        }
        Commands::Validate => cmd_validate(&config, cli.config.as_deref(), json_mode),
        Commands::Checksum {
            script,
            ticks,
            restore,
        } => cmd_checksum(config, script, ticks, restore, json_mode).await,
    }
}
