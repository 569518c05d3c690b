//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: dispatch follows from the stored candidates
//! - discover: refresh candidates from the suggestions directory
//! - import: merge a users.json export into the store
//! - status / list: inspect the store

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// skyfollow - rate-limited follow dispatcher for Bluesky
#[derive(Parser, Debug)]
#[command(name = "skyfollow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (defaults to status)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Dispatch follows until interrupted
    Run {
        /// Actually follow accounts (default is simulation)
        #[arg(long)]
        real: bool,

        /// Skip accounts with fewer followers than this
        #[arg(short, long, default_value_t = 0)]
        min_followers: u64,

        /// Give accounts that hit the retry ceiling another round
        #[arg(long)]
        retry_exhausted: bool,
    },

    /// Fetch suggested accounts and save their follower counts
    Discover,

    /// Import a users.json export
    Import {
        /// Path to the export file
        file: PathBuf,
    },

    /// Show store counts and the configured limits
    Status,

    /// List stored accounts
    List {
        /// Only accounts not yet followed
        #[arg(short, long, conflicts_with = "followed")]
        pending: bool,

        /// Only followed accounts
        #[arg(short, long)]
        followed: bool,

        /// Maximum rows to print
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },
}
