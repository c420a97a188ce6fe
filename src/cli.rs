//! Command-line interface of dailysign, built on clap.
//!
//! Defines [`Cli`] with its [`Command`] subcommands (check, detect, history)
//! and the global flags (--config, --verbose).
//!
//! The check-in run itself needs a device backend, so it has no subcommand
//! here: a host implements [`crate::device::Device`] and calls
//! [`crate::orchestrator::WorkflowOrchestrator::run`]. The binary covers the
//! backend-independent chores around that run.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_FILE;

const RUN_NOTE: &str =
    "The check-in run is started by a host application that embeds the dailysign library.";

/// dailysign: unattended daily check-in for the community app.
#[derive(Debug, Parser)]
#[command(name = "dailysign", version, about, after_help = RUN_NOTE)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the TOML configuration file.
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Enables verbose (debug) output.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validates the configuration and shows what a run would do.
    Check,

    /// Runs the configured detector on a challenge image.
    Detect {
        /// PNG crop of the challenge region.
        image: PathBuf,
    },

    /// Prints the recorded growth history.
    History {
        /// Only show the most recent N records.
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },
}
