//! # Token Ownership Reconciliation
//!
//! The minter writes two logs: a mint record per token at issuance and a
//! transfer record per ownership change, numbered by `sequence_no`. The
//! current owner of a token is the recipient of its highest-sequence
//! transfer, or the mint recipient if it was never transferred.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use nftm_core::{Address, ContractId, ListingId, TokenId};

use crate::allocation::TokenRange;

/// A token issued by the minter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRecord {
    pub token_id: TokenId,
    pub issued_to: Address,
    pub contract_id: ContractId,
    pub tx_id: String,
    /// Listing the mint was requested for, when the minter reports it.
    pub listing_id: Option<ListingId>,
}

/// An ownership change recorded by the minter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub token_id: TokenId,
    pub to_address: Address,
    pub sequence_no: i64,
    pub contract_id: ContractId,
    pub tx_id: String,
}

/// Which log an ownership answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum OwnershipSource {
    Mint,
    Transfer { sequence_no: i64 },
}

/// The resolved owner of one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOwner {
    pub token_id: TokenId,
    pub owner: Address,
    pub source: OwnershipSource,
}

/// Keep only the highest-sequence transfer per token.
pub fn latest_transfers(
    transfers: impl IntoIterator<Item = TransferRecord>,
) -> BTreeMap<TokenId, TransferRecord> {
    let mut latest: BTreeMap<TokenId, TransferRecord> = BTreeMap::new();
    for t in transfers {
        match latest.get(&t.token_id) {
            Some(existing) if existing.sequence_no >= t.sequence_no => {}
            _ => {
                latest.insert(t.token_id, t);
            }
        }
    }
    latest
}

/// Token ids in `range` that have no transfer.
pub fn untransferred(range: TokenRange, latest: &BTreeMap<TokenId, TransferRecord>) -> Vec<TokenId> {
    range.tokens().filter(|t| !latest.contains_key(t)).collect()
}

/// Merge transfer-derived and mint-derived owners, ascending by token id.
///
/// A token present in both logs resolves to its transfer. Mint records for
/// transferred tokens are ignored, so no token id appears twice.
pub fn merge_ownership(
    latest: BTreeMap<TokenId, TransferRecord>,
    mints: impl IntoIterator<Item = MintRecord>,
) -> Vec<TokenOwner> {
    let mut owners: BTreeMap<TokenId, TokenOwner> = latest
        .into_values()
        .map(|t| {
            (
                t.token_id,
                TokenOwner {
                    token_id: t.token_id,
                    owner: t.to_address,
                    source: OwnershipSource::Transfer {
                        sequence_no: t.sequence_no,
                    },
                },
            )
        })
        .collect();
    for m in mints {
        owners.entry(m.token_id).or_insert(TokenOwner {
            token_id: m.token_id,
            owner: m.issued_to,
            source: OwnershipSource::Mint,
        });
    }
    owners.into_values().collect()
}

/// The first complete edition among a listing's mint records.
///
/// Returns the lowest gap-free run of `issue_count` token ids, or `None`
/// until one is visible. Ids past that run (a repeated dispatch minting a
/// second edition) do not prevent binding the first.
pub fn minted_range(records: &[MintRecord], issue_count: i64) -> Option<TokenRange> {
    if issue_count <= 0 {
        return None;
    }
    let ids: BTreeSet<TokenId> = records.iter().map(|r| r.token_id).collect();
    let mut run: Option<(TokenId, TokenId)> = None;
    for id in ids {
        let start = match run {
            Some((start, prev)) if id.get() == prev.get() + 1 => start,
            _ => id,
        };
        if id.get() - start.get() + 1 == issue_count {
            return TokenRange::new(start, id).ok();
        }
        run = Some((start, id));
    }
    None
}
