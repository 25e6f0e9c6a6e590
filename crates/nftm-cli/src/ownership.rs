//! `nftm ownership`: print the current owner of each token in a range.

use clap::Args;

use nftm_core::TokenId;
use nftm_saga::MintCoordinator;

/// Arguments for the `ownership` subcommand.
#[derive(Args, Debug)]
pub struct OwnershipArgs {
    /// First token id (inclusive).
    #[arg(long)]
    pub from: i64,

    /// Last token id (inclusive).
    #[arg(long)]
    pub to: i64,
}

pub async fn run_ownership(args: &OwnershipArgs, json: bool) -> anyhow::Result<u8> {
    let saga = crate::connect().await?;
    print_owners(saga.mints(), args, json).await
}

async fn print_owners(mints: &MintCoordinator, args: &OwnershipArgs, json: bool) -> anyhow::Result<u8> {
    let owners = mints
        .resolve_token_ownership(TokenId(args.from), TokenId(args.to))
        .await?;
    if owners.is_empty() {
        tracing::warn!(from = args.from, to = args.to, "no mint or transfer records in range");
        return Ok(2);
    }
    for owner in &owners {
        if json {
            println!("{}", serde_json::to_string(owner)?);
        } else {
            println!("{}\t{}", owner.token_id.get(), owner.owner.as_str());
        }
    }
    Ok(0)
}
