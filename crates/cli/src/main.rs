//! Operator CLI for the offsync queue.
//!
//! Run with: `offsync [--config <path>] [--database <path>] [--json] <command>`
//!
//! Command results go to stdout through `println!`; diagnostics go through
//! `tracing` on stderr.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod output;

#[derive(Parser, Debug)]
#[command(name = "offsync", version, about = "Inspect and drive the offline-first sync queue")]
pub struct Cli {
    /// Config file (TOML or JSON); standard locations are searched when omitted
    #[arg(long, global = true, env = "OFFSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Queue database path, overriding the config file
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Queue counts by status and entity type
    Status {
        /// Summarize failed operations per entity type instead
        #[arg(long, default_value_t = false)]
        failed: bool,
    },
    /// Pending operations in dispatch order
    Pending {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Return failed operations to pending
    ResetFailed {
        /// Only this entity type
        #[arg(long)]
        entity: Option<String>,
        /// Only operations retried fewer than this many times
        #[arg(long)]
        max_retries: Option<u32>,
        /// Leave validation failures and unresolved conflicts alone
        #[arg(long, default_value_t = false)]
        retryable_only: bool,
    },
    /// Move pending operations of an entity type to another priority class
    Reprioritize {
        #[arg(required_unless_present = "from_schema")]
        entity: Option<String>,
        #[arg(required_unless_present = "from_schema", allow_negative_numbers = true)]
        priority: Option<i32>,
        /// Reset every pending operation to its schema priority
        #[arg(long, default_value_t = false, conflicts_with_all = ["entity", "priority"])]
        from_schema: bool,
    },
    /// Queue a create for every local entity the remote side does not know
    Resync,
    /// Run one reconcile pass
    Reconcile {
        /// Also purge completed operations older than this many days
        #[arg(long, value_name = "DAYS")]
        purge: Option<u32>,
    },
    /// Record the remote id of a local entity resolved by hand
    Map { entity: String, local_id: String, remote_id: String },
    /// Run one dispatch cycle
    Dispatch,
    /// Run the dispatch and reconcile workers until Ctrl-C
    Run,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match commands::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
