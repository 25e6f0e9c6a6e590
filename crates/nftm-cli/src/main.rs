//! # nftm CLI entry point
//!
//! Parses command-line arguments, configures tracing, and dispatches to the
//! subcommand handlers in the library crate.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use nftm_cli::ownership::{run_ownership, OwnershipArgs};
use nftm_cli::worker::{run_reconcile, run_worker, ReconcileArgs, WorkerArgs};

/// Market saga operator CLI.
///
/// Runs the mint outbox worker, performs one-off reconciliation, and
/// resolves current token ownership from the minter's records.
#[derive(Parser, Debug)]
#[command(name = "nftm", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs (and ownership rows) as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dispatch pending mints and bind minted ranges until interrupted.
    Worker(WorkerArgs),

    /// Run one dispatch and reconciliation pass.
    Reconcile(ReconcileArgs),

    /// Print the current owner of every token in a range.
    Ownership(OwnershipArgs),
}

fn init_tracing(verbose: u8, json: bool) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    let result = match cli.command {
        Commands::Worker(args) => run_worker(&args).await,
        Commands::Reconcile(args) => run_reconcile(&args).await,
        Commands::Ownership(args) => run_ownership(&args, cli.json).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
