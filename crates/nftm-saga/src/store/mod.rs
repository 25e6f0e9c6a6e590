//! # Persistence
//!
//! The saga talks to storage through the traits below, always as
//! `Arc<dyn MarketStore>`. Two implementations exist:
//!
//! - [`PgStore`]: Postgres via `sqlx`. Every read-modify-write loads its row
//!   with `SELECT ... FOR UPDATE`, applies the domain mutation, writes, and
//!   commits in one transaction. A transaction dropped before commit rolls
//!   back.
//! - [`MemoryStore`]: a `parking_lot`-guarded in-process store with the same
//!   semantics, used by tests and local runs.
//!
//! Mutations are passed in as closures and run while the row is locked, so
//! token-range allocation and the parent's `sale_count` update are one
//! atomic step. A closure that returns an error leaves the store unchanged.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nftm_core::{Address, AssetId, ContractId, ListingId, ProductId, PurchaseId, TokenId, UserId};
use nftm_gateway::MintRequest;
use nftm_state::{
    IdentityWalletRef, Listing, ListingDraft, ListingError, MintRecord, PurchaseDraft,
    PurchaseRecord, TokenRange, TransferRecord,
};

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use postgres::{init_pool, PgStore};

/// Mutation applied to a locked listing.
pub type ListingUpdate = Box<dyn FnOnce(&mut Listing) -> Result<(), ListingError> + Send>;

/// Resale carved out of a locked purchase.
pub type ResaleAllocation =
    Box<dyn FnOnce(&mut PurchaseRecord) -> Result<ListingDraft, ListingError> + Send>;

/// Purchase carved out of a locked listing.
pub type PurchaseAllocation =
    Box<dyn FnOnce(&mut Listing) -> Result<PurchaseDraft, ListingError> + Send>;

// ─── Records ─────────────────────────────────────────────────────────

/// A local user or enterprise account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    pub nickname: String,
    /// Ledger address, when the user registered one.
    pub address: Option<Address>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub email: String,
    pub nickname: String,
}

/// The contract binding a product and an asset to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContract {
    pub id: ContractId,
    pub owner: UserId,
    pub product_id: ProductId,
    pub asset_id: AssetId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub owner: UserId,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAsset {
    pub owner: UserId,
    pub product_id: ProductId,
    pub file_name: String,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContract {
    pub owner: UserId,
    pub product_id: ProductId,
    pub asset_id: AssetId,
}

/// A mint request before its listing id is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintOrder {
    pub asset_ref: AssetId,
    pub product_ref: ProductId,
    pub issued_to_address: Address,
    pub issue_count: i64,
}

impl MintOrder {
    pub fn for_listing(self, listing_id: ListingId) -> MintRequest {
        MintRequest {
            asset_ref: self.asset_ref,
            product_ref: self.product_ref,
            issued_to_address: self.issued_to_address,
            issue_count: self.issue_count,
            market_listing_id: listing_id,
        }
    }
}

/// Lifecycle of a mint outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Waiting for its first dispatch.
    Pending,
    /// Claimed by a dispatcher; the HTTP call is in flight.
    Dispatching,
    /// Accepted by the minter; waiting for mint records.
    Dispatched,
    /// The last dispatch failed; eligible for another attempt.
    Failed,
    /// Mint records seen and bound to the listing.
    Completed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatching => "dispatching",
            Self::Dispatched => "dispatched",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "dispatching" => Some(Self::Dispatching),
            "dispatched" => Some(Self::Dispatched),
            "failed" => Some(Self::Failed),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable mint request. One per listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub listing_id: ListingId,
    pub request: MintRequest,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last time reconciliation looked at this entry.
    #[serde(default)]
    pub checked_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    pub fn new(request: MintRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            listing_id: request.market_listing_id,
            request,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            checked_at: None,
        }
    }

    /// Whether `requeue_mint` may reset this entry. Anything the minter may
    /// already hold (pending, in flight, accepted, bound) is left alone.
    pub fn is_requeueable(&self) -> bool {
        self.status == OutboxStatus::Failed
    }

    /// Whether a dispatcher may claim this entry at `now`.
    pub fn is_claimable(&self, max_attempts: i32, stale_before: DateTime<Utc>) -> bool {
        match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::Failed => self.attempts < max_attempts,
            OutboxStatus::Dispatching => self.updated_at < stale_before,
            OutboxStatus::Dispatched | OutboxStatus::Completed => false,
        }
    }
}

// ─── Traits ──────────────────────────────────────────────────────────

/// Listings, purchases and their source contracts.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn contract(&self, id: ContractId) -> Result<Option<SourceContract>, StoreError>;

    async fn listing(&self, id: ListingId) -> Result<Option<Listing>, StoreError>;

    async fn purchase_record(&self, id: PurchaseId) -> Result<Option<PurchaseRecord>, StoreError>;

    /// Insert a listing and, when `mint` is given, its outbox entry in the
    /// same transaction.
    async fn insert_listing(
        &self,
        draft: ListingDraft,
        mint: Option<MintOrder>,
    ) -> Result<(Listing, Option<OutboxEntry>), StoreError>;

    /// Lock the listing, apply `update`, persist.
    async fn update_listing(&self, id: ListingId, update: ListingUpdate) -> Result<Listing, StoreError>;

    /// Lock the parent purchase, carve a resale out of it, persist both.
    async fn insert_resale(
        &self,
        parent: PurchaseId,
        allocate: ResaleAllocation,
    ) -> Result<Listing, StoreError>;

    /// Lock the listing, carve a purchase out of it, persist both.
    async fn insert_purchase(
        &self,
        listing: ListingId,
        allocate: PurchaseAllocation,
    ) -> Result<PurchaseRecord, StoreError>;
}

/// Mint and transfer records written by the minter.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn mints_for_listing(&self, listing: ListingId) -> Result<Vec<MintRecord>, StoreError>;

    async fn mints_for_tokens(&self, tokens: &[TokenId]) -> Result<Vec<MintRecord>, StoreError>;

    async fn transfers_in_range(&self, range: TokenRange) -> Result<Vec<TransferRecord>, StoreError>;
}

/// The mint outbox.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn outbox_for_listing(&self, listing: ListingId) -> Result<Option<OutboxEntry>, StoreError>;

    /// Create the listing's entry, or reset a `Failed` one to `Pending` with
    /// a fresh request and zero attempts. An entry in any other status is
    /// returned unchanged.
    async fn requeue_mint(&self, request: MintRequest) -> Result<OutboxEntry, StoreError>;

    /// Replace the request of an entry that has not reached the minter yet
    /// (`Pending` or `Failed`). `None` if there is no such entry.
    async fn resize_mint_request(&self, request: MintRequest) -> Result<Option<OutboxEntry>, StoreError>;

    /// Entries a dispatcher may claim, oldest first.
    async fn claimable_outbox(
        &self,
        max_attempts: i32,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Atomically move a claimable entry to `Dispatching`. `None` if another
    /// dispatcher got there first or the entry is no longer claimable.
    async fn claim_outbox(
        &self,
        id: Uuid,
        max_attempts: i32,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<OutboxEntry>, StoreError>;

    /// Record a dispatch outcome: `Dispatched` on `Ok`, `Failed` with the
    /// message on `Err`. Increments `attempts` either way.
    async fn record_dispatch(&self, id: Uuid, outcome: Result<(), String>) -> Result<(), StoreError>;

    /// Up to `limit` entries accepted by the minter and not yet reconciled,
    /// least recently checked first. Stamps `checked_at` on each returned
    /// entry so successive calls rotate through the whole backlog.
    async fn next_dispatched(&self, limit: i64) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Fail a `Dispatched` entry whose dispatch is older than
    /// `dispatched_before`. `None` if the entry moved on in the meantime.
    async fn expire_dispatched(
        &self,
        id: Uuid,
        dispatched_before: DateTime<Utc>,
        reason: String,
    ) -> Result<Option<OutboxEntry>, StoreError>;

    /// Mark the listing's entry `Completed`. No-op without an entry.
    async fn complete_outbox(&self, listing: ListingId) -> Result<(), StoreError>;
}

/// Users and their DID wallets.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError>;

    async fn user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Insert the user, or return the existing one with the same email.
    async fn ensure_user(&self, user: NewUser) -> Result<UserRecord, StoreError>;

    async fn wallet(&self, owner: UserId) -> Result<Option<IdentityWalletRef>, StoreError>;

    /// Overwrite (or clear) the wallet's JWT, creating the wallet row if
    /// needed. The wallet DID is left alone.
    async fn save_jwt(&self, owner: UserId, jwt: Option<String>) -> Result<(), StoreError>;

    /// Bind the wallet DID if none is bound yet; returns the wallet as
    /// stored afterwards.
    async fn bind_wallet_did(&self, owner: UserId, did: String) -> Result<IdentityWalletRef, StoreError>;
}

/// Product, asset and contract registries.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn create_product(&self, product: NewProduct) -> Result<ProductId, StoreError>;

    async fn create_asset(&self, asset: NewAsset) -> Result<AssetId, StoreError>;

    async fn create_contract(&self, contract: NewContract) -> Result<SourceContract, StoreError>;
}

/// Everything the saga needs from storage.
pub trait MarketStore: ListingStore + LedgerStore + OutboxStore + IdentityStore + CatalogStore {}

impl<T> MarketStore for T where T: ListingStore + LedgerStore + OutboxStore + IdentityStore + CatalogStore {}
