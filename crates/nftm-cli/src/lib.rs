//! # nftm-cli — Operator Commands
//!
//! Each subcommand lives in its own module and exposes a `run_*` handler
//! returning a process exit code. [`connect`] assembles the saga from the
//! environment for handlers that need it.

pub mod ownership;
pub mod worker;

use std::sync::Arc;

use anyhow::Context;

use nftm_gateway::{DidProviderClient, GatewayConfig, MintClient};
use nftm_saga::{init_pool, PgStore, SagaConfig, SagaOrchestrator};

/// Default maximum size of the Postgres pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Build a [`SagaOrchestrator`] over Postgres from environment variables.
///
/// Reads `DATABASE_URL` and `NFTM_DB_MAX_CONNECTIONS` here, then
/// [`GatewayConfig::from_env`] and [`SagaConfig::from_env`].
pub async fn connect() -> anyhow::Result<SagaOrchestrator> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let max_connections = match std::env::var("NFTM_DB_MAX_CONNECTIONS") {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid NFTM_DB_MAX_CONNECTIONS: {raw:?}"))?,
        Err(_) => DEFAULT_MAX_CONNECTIONS,
    };

    let pool = init_pool(&database_url, max_connections)
        .await
        .context("database initialization failed")?;
    tracing::info!(max_connections, "database pool ready");

    let gateway = GatewayConfig::from_env().context("gateway configuration")?;
    let config = SagaConfig::from_env().context("saga configuration")?;
    tracing::debug!(?gateway, ?config, "configuration loaded");

    let did = DidProviderClient::new(&gateway).context("DID provider client")?;
    let minter = MintClient::new(&gateway).context("minter client")?;
    Ok(SagaOrchestrator::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(did),
        Arc::new(minter),
        config,
    ))
}
