//! `nftm worker` and `nftm reconcile`: drive the mint outbox.

use std::time::Duration;

use clap::Args;

use nftm_saga::MintCoordinator;

/// Arguments for the `worker` subcommand.
#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Override the delay between passes, in milliseconds.
    #[arg(long)]
    pub tick_ms: Option<u64>,
}

/// Arguments for the `reconcile` subcommand.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Only bind visible mint results; do not dispatch pending entries.
    #[arg(long)]
    pub no_dispatch: bool,
}

/// One dispatch pass followed by one reconciliation pass.
async fn pass(mints: &MintCoordinator, dispatch: bool) -> anyhow::Result<()> {
    if dispatch {
        mints.dispatch_pending().await?;
    }
    mints.reconcile_minted().await?;
    Ok(())
}

/// Run passes every tick until Ctrl-C.
pub async fn run_worker(args: &WorkerArgs) -> anyhow::Result<u8> {
    let saga = crate::connect().await?;
    let tick = args
        .tick_ms
        .map(Duration::from_millis)
        .unwrap_or(saga.config().outbox.worker_tick);
    let mints = saga.mints().clone();
    tracing::info!(?tick, "mint outbox worker started");

    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                // A failed pass is retried on the next tick.
                if let Err(e) = pass(&mints, true).await {
                    tracing::error!("worker pass failed: {e:#}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested; worker stopping");
                return Ok(0);
            }
        }
    }
}

/// Run a single pass and exit.
pub async fn run_reconcile(args: &ReconcileArgs) -> anyhow::Result<u8> {
    let saga = crate::connect().await?;
    pass(saga.mints(), !args.no_dispatch).await?;
    Ok(0)
}
