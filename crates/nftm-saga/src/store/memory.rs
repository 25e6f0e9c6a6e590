//! In-memory [`MarketStore`](super::MarketStore).
//!
//! One `RwLock` guards every table, so each trait call is serialized the
//! way a row lock would serialize it in Postgres. Closures run against a
//! clone of the row and are written back only on success.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use nftm_core::{Address, AssetId, ContractId, ListingId, ProductId, PurchaseId, TokenId, UserId};
use nftm_gateway::MintRequest;
use nftm_state::{
    IdentityWalletRef, Listing, ListingDraft, MintRecord, PurchaseRecord, TokenRange,
    TransferRecord,
};

use super::{
    CatalogStore, IdentityStore, LedgerStore, ListingStore, ListingUpdate, MintOrder, NewAsset,
    NewContract, NewProduct, NewUser, OutboxEntry, OutboxStatus, OutboxStore, PurchaseAllocation,
    ResaleAllocation, SourceContract, UserRecord,
};
use crate::error::StoreError;

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<UserId, UserRecord>,
    wallets: HashMap<UserId, IdentityWalletRef>,
    products: BTreeMap<ProductId, NewProduct>,
    assets: BTreeMap<AssetId, NewAsset>,
    contracts: BTreeMap<ContractId, SourceContract>,
    listings: BTreeMap<ListingId, Listing>,
    purchases: BTreeMap<PurchaseId, PurchaseRecord>,
    outbox: Vec<OutboxEntry>,
    mints: BTreeMap<TokenId, MintRecord>,
    transfers: Vec<TransferRecord>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_listing(&mut self, draft: ListingDraft, now: DateTime<Utc>) -> Listing {
        let id = ListingId(self.next_id());
        let listing = draft.into_listing(id, now);
        self.listings.insert(id, listing.clone());
        listing
    }
}

/// In-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
    listing_reads: Arc<AtomicUsize>,
    fail_next_listing_insert: Arc<AtomicBool>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.inner.read();
        f.debug_struct("MemoryStore")
            .field("listings", &tables.listings.len())
            .field("purchases", &tables.purchases.len())
            .field("outbox", &tables.outbox.len())
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of single-listing lookups served so far.
    pub fn listing_reads(&self) -> usize {
        self.listing_reads.load(Ordering::SeqCst)
    }

    /// Record a mint the way the minting service would.
    pub fn record_mint(&self, record: MintRecord) {
        self.inner.write().mints.insert(record.token_id, record);
    }

    /// Mint a whole listing edition to `issued_to`, starting at `first`.
    pub fn record_edition(&self, listing: ListingId, contract_id: ContractId, first: TokenId, count: i64, issued_to: &Address) {
        let mut tables = self.inner.write();
        for n in 0..count {
            let token_id = TokenId(first.get() + n);
            tables.mints.insert(
                token_id,
                MintRecord {
                    token_id,
                    issued_to: issued_to.clone(),
                    contract_id,
                    tx_id: format!("tx-mint-{}", token_id.get()),
                    listing_id: Some(listing),
                },
            );
        }
    }

    /// Record a transfer the way the minting service would.
    pub fn record_transfer(&self, record: TransferRecord) {
        self.inner.write().transfers.push(record);
    }

    /// Seed a purchase record directly (resale parents in tests and demos).
    pub fn seed_purchase(&self, record: PurchaseRecord) {
        self.inner.write().purchases.insert(record.id, record);
    }

    /// Make the next `insert_listing` fail with a database error.
    #[cfg(test)]
    pub(crate) fn fail_next_listing_insert(&self) {
        self.fail_next_listing_insert.store(true, Ordering::SeqCst);
    }
}

// ─── Listings ────────────────────────────────────────────────────────

#[async_trait]
impl ListingStore for MemoryStore {
    async fn contract(&self, id: ContractId) -> Result<Option<SourceContract>, StoreError> {
        Ok(self.inner.read().contracts.get(&id).cloned())
    }

    async fn listing(&self, id: ListingId) -> Result<Option<Listing>, StoreError> {
        self.listing_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.read().listings.get(&id).cloned())
    }

    async fn purchase_record(&self, id: PurchaseId) -> Result<Option<PurchaseRecord>, StoreError> {
        Ok(self.inner.read().purchases.get(&id).cloned())
    }

    async fn insert_listing(
        &self,
        draft: ListingDraft,
        mint: Option<MintOrder>,
    ) -> Result<(Listing, Option<OutboxEntry>), StoreError> {
        if self.fail_next_listing_insert.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let now = Utc::now();
        let mut tables = self.inner.write();
        if !tables.contracts.contains_key(&draft.source_contract_id) {
            return Err(StoreError::NotFound(draft.source_contract_id.to_string()));
        }
        let listing = tables.insert_listing(draft, now);
        let entry = mint.map(|order| {
            let entry = OutboxEntry::new(order.for_listing(listing.id), now);
            tables.outbox.push(entry.clone());
            entry
        });
        Ok((listing, entry))
    }

    async fn update_listing(&self, id: ListingId, update: ListingUpdate) -> Result<Listing, StoreError> {
        let mut tables = self.inner.write();
        let current = tables
            .listings
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut next = current.clone();
        update(&mut next)?;
        next.check_invariants()?;
        tables.listings.insert(id, next.clone());
        Ok(next)
    }

    async fn insert_resale(
        &self,
        parent: PurchaseId,
        allocate: ResaleAllocation,
    ) -> Result<Listing, StoreError> {
        let now = Utc::now();
        let mut tables = self.inner.write();
        let current = tables
            .purchases
            .get(&parent)
            .ok_or_else(|| StoreError::NotFound(parent.to_string()))?;
        let mut next = current.clone();
        let draft = allocate(&mut next)?;
        next.check_invariants()?;
        tables.purchases.insert(parent, next);
        Ok(tables.insert_listing(draft, now))
    }

    async fn insert_purchase(
        &self,
        listing: ListingId,
        allocate: PurchaseAllocation,
    ) -> Result<PurchaseRecord, StoreError> {
        let now = Utc::now();
        let mut tables = self.inner.write();
        let current = tables
            .listings
            .get(&listing)
            .ok_or_else(|| StoreError::NotFound(listing.to_string()))?;
        let mut next = current.clone();
        let draft = allocate(&mut next)?;
        next.check_invariants()?;
        tables.listings.insert(listing, next);
        let id = PurchaseId(tables.next_id());
        let record = draft.into_record(id, now);
        tables.purchases.insert(id, record.clone());
        Ok(record)
    }
}

// ─── Ledger ──────────────────────────────────────────────────────────

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn mints_for_listing(&self, listing: ListingId) -> Result<Vec<MintRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .mints
            .values()
            .filter(|m| m.listing_id == Some(listing))
            .cloned()
            .collect())
    }

    async fn mints_for_tokens(&self, tokens: &[TokenId]) -> Result<Vec<MintRecord>, StoreError> {
        let tables = self.inner.read();
        Ok(tokens
            .iter()
            .filter_map(|t| tables.mints.get(t).cloned())
            .collect())
    }

    async fn transfers_in_range(&self, range: TokenRange) -> Result<Vec<TransferRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .transfers
            .iter()
            .filter(|t| range.contains(t.token_id))
            .cloned()
            .collect())
    }
}

// ─── Outbox ──────────────────────────────────────────────────────────

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn outbox_for_listing(&self, listing: ListingId) -> Result<Option<OutboxEntry>, StoreError> {
        Ok(self
            .inner
            .read()
            .outbox
            .iter()
            .find(|e| e.listing_id == listing)
            .cloned())
    }

    async fn requeue_mint(&self, request: MintRequest) -> Result<OutboxEntry, StoreError> {
        let now = Utc::now();
        let mut tables = self.inner.write();
        if let Some(entry) = tables
            .outbox
            .iter_mut()
            .find(|e| e.listing_id == request.market_listing_id)
        {
            if entry.is_requeueable() {
                entry.request = request;
                entry.status = OutboxStatus::Pending;
                entry.attempts = 0;
                entry.last_error = None;
                entry.checked_at = None;
                entry.updated_at = now;
            }
            return Ok(entry.clone());
        }
        let entry = OutboxEntry::new(request, now);
        tables.outbox.push(entry.clone());
        Ok(entry)
    }

    async fn resize_mint_request(&self, request: MintRequest) -> Result<Option<OutboxEntry>, StoreError> {
        let mut tables = self.inner.write();
        let Some(entry) = tables.outbox.iter_mut().find(|e| {
            e.listing_id == request.market_listing_id
                && matches!(e.status, OutboxStatus::Pending | OutboxStatus::Failed)
        }) else {
            return Ok(None);
        };
        entry.request = request;
        entry.updated_at = Utc::now();
        Ok(Some(entry.clone()))
    }

    async fn claimable_outbox(
        &self,
        max_attempts: i32,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .inner
            .read()
            .outbox
            .iter()
            .filter(|e| e.is_claimable(max_attempts, stale_before))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn claim_outbox(
        &self,
        id: Uuid,
        max_attempts: i32,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<OutboxEntry>, StoreError> {
        let mut tables = self.inner.write();
        let Some(entry) = tables.outbox.iter_mut().find(|e| e.id == id) else {
            return Ok(None);
        };
        if !entry.is_claimable(max_attempts, stale_before) {
            return Ok(None);
        }
        entry.status = OutboxStatus::Dispatching;
        entry.updated_at = Utc::now();
        Ok(Some(entry.clone()))
    }

    async fn record_dispatch(&self, id: Uuid, outcome: Result<(), String>) -> Result<(), StoreError> {
        let mut tables = self.inner.write();
        let entry = tables
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("outbox entry {id}")))?;
        entry.attempts += 1;
        entry.updated_at = Utc::now();
        match outcome {
            Ok(()) => {
                entry.status = OutboxStatus::Dispatched;
                entry.last_error = None;
            }
            Err(message) => {
                entry.status = OutboxStatus::Failed;
                entry.last_error = Some(message);
            }
        }
        Ok(())
    }

    async fn next_dispatched(&self, limit: i64) -> Result<Vec<OutboxEntry>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let now = Utc::now();
        let mut tables = self.inner.write();
        let mut due: Vec<&mut OutboxEntry> = tables
            .outbox
            .iter_mut()
            .filter(|e| e.status == OutboxStatus::Dispatched)
            .collect();
        due.sort_by_key(|e| (e.checked_at, e.created_at));
        Ok(due
            .into_iter()
            .take(limit)
            .map(|e| {
                e.checked_at = Some(now);
                e.clone()
            })
            .collect())
    }

    async fn expire_dispatched(
        &self,
        id: Uuid,
        dispatched_before: DateTime<Utc>,
        reason: String,
    ) -> Result<Option<OutboxEntry>, StoreError> {
        let mut tables = self.inner.write();
        let Some(entry) = tables.outbox.iter_mut().find(|e| {
            e.id == id && e.status == OutboxStatus::Dispatched && e.updated_at < dispatched_before
        }) else {
            return Ok(None);
        };
        entry.status = OutboxStatus::Failed;
        entry.last_error = Some(reason);
        entry.updated_at = Utc::now();
        Ok(Some(entry.clone()))
    }

    async fn complete_outbox(&self, listing: ListingId) -> Result<(), StoreError> {
        let mut tables = self.inner.write();
        if let Some(entry) = tables.outbox.iter_mut().find(|e| e.listing_id == listing) {
            entry.status = OutboxStatus::Completed;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }
}

// ─── Identity ────────────────────────────────────────────────────────

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.inner.read().users.get(&id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn ensure_user(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let mut tables = self.inner.write();
        if let Some(existing) = tables.users.values().find(|u| u.email == user.email) {
            return Ok(existing.clone());
        }
        let id = UserId(tables.next_id());
        let record = UserRecord {
            id,
            email: user.email,
            nickname: user.nickname,
            address: None,
            created_at: Utc::now(),
        };
        tables.users.insert(id, record.clone());
        Ok(record)
    }

    async fn wallet(&self, owner: UserId) -> Result<Option<IdentityWalletRef>, StoreError> {
        Ok(self.inner.read().wallets.get(&owner).cloned())
    }

    async fn save_jwt(&self, owner: UserId, jwt: Option<String>) -> Result<(), StoreError> {
        let mut tables = self.inner.write();
        let wallet = tables
            .wallets
            .entry(owner)
            .or_insert_with(|| IdentityWalletRef::new(owner));
        match jwt {
            Some(token) => wallet.set_jwt(token),
            None => wallet.clear_jwt(),
        }
        Ok(())
    }

    async fn bind_wallet_did(&self, owner: UserId, did: String) -> Result<IdentityWalletRef, StoreError> {
        let mut tables = self.inner.write();
        let wallet = tables
            .wallets
            .entry(owner)
            .or_insert_with(|| IdentityWalletRef::new(owner));
        wallet.bind_wallet_did(did);
        Ok(wallet.clone())
    }
}

// ─── Catalog ─────────────────────────────────────────────────────────

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn create_product(&self, product: NewProduct) -> Result<ProductId, StoreError> {
        let mut tables = self.inner.write();
        let id = ProductId(tables.next_id());
        tables.products.insert(id, product);
        Ok(id)
    }

    async fn create_asset(&self, asset: NewAsset) -> Result<AssetId, StoreError> {
        let mut tables = self.inner.write();
        if !tables.products.contains_key(&asset.product_id) {
            return Err(StoreError::NotFound(asset.product_id.to_string()));
        }
        let id = AssetId(tables.next_id());
        tables.assets.insert(id, asset);
        Ok(id)
    }

    async fn create_contract(&self, contract: NewContract) -> Result<SourceContract, StoreError> {
        let mut tables = self.inner.write();
        if !tables.assets.contains_key(&contract.asset_id) {
            return Err(StoreError::NotFound(contract.asset_id.to_string()));
        }
        let id = ContractId(tables.next_id());
        let record = SourceContract {
            id,
            owner: contract.owner,
            product_id: contract.product_id,
            asset_id: contract.asset_id,
            created_at: Utc::now(),
        };
        tables.contracts.insert(id, record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use nftm_core::Price;
    use nftm_state::{ListingError, ListingState, Seller};

    async fn seeded() -> (MemoryStore, SourceContract) {
        let store = MemoryStore::new();
        let user = store
            .ensure_user(NewUser {
                email: "s@example.com".into(),
                nickname: "s".into(),
            })
            .await
            .unwrap();
        let product = store
            .create_product(NewProduct {
                owner: user.id,
                name: "p".into(),
                description: String::new(),
            })
            .await
            .unwrap();
        let asset = store
            .create_asset(NewAsset {
                owner: user.id,
                product_id: product,
                file_name: "a.png".into(),
                content_type: "image/png".into(),
            })
            .await
            .unwrap();
        let contract = store
            .create_contract(NewContract {
                owner: user.id,
                product_id: product,
                asset_id: asset,
            })
            .await
            .unwrap();
        (store, contract)
    }

    fn draft(contract: ContractId) -> ListingDraft {
        ListingDraft {
            source_contract_id: contract,
            seller: Seller {
                user_id: UserId(1),
                address: Address::new("0xs").unwrap(),
                name: "s".into(),
            },
            price: Price::new(10).unwrap(),
            issue_count: 3,
            start_date: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
            end_date: None,
            token_range: None,
            parent_purchase: None,
            initial_state: ListingState::PendingMint,
        }
    }

    #[tokio::test]
    async fn insert_listing_writes_outbox_entry() {
        let (store, contract) = seeded().await;
        let order = MintOrder {
            asset_ref: contract.asset_id,
            product_ref: contract.product_id,
            issued_to_address: Address::new("0xs").unwrap(),
            issue_count: 3,
        };
        let (listing, entry) = store.insert_listing(draft(contract.id), Some(order)).await.unwrap();
        let entry = entry.unwrap();
        assert_eq!(entry.listing_id, listing.id);
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(
            store.outbox_for_listing(listing.id).await.unwrap(),
            Some(entry)
        );
    }

    #[tokio::test]
    async fn insert_listing_requires_contract() {
        let store = MemoryStore::new();
        let err = store.insert_listing(draft(ContractId(404)), None).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn failed_update_leaves_row_untouched() {
        let (store, contract) = seeded().await;
        let (listing, _) = store.insert_listing(draft(contract.id), None).await.unwrap();
        let err = store
            .update_listing(
                listing.id,
                Box::new(|l: &mut Listing| {
                    l.sale_count = 99;
                    Err(ListingError::NotMinted)
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(ListingError::NotMinted)));
        let stored = store.listing(listing.id).await.unwrap().unwrap();
        assert_eq!(stored.sale_count, 0);
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let (store, contract) = seeded().await;
        let order = MintOrder {
            asset_ref: contract.asset_id,
            product_ref: contract.product_id,
            issued_to_address: Address::new("0xs").unwrap(),
            issue_count: 3,
        };
        let (_, entry) = store.insert_listing(draft(contract.id), Some(order)).await.unwrap();
        let id = entry.unwrap().id;
        let stale_before = Utc::now() - chrono::Duration::seconds(60);
        assert!(store.claim_outbox(id, 5, stale_before).await.unwrap().is_some());
        assert!(store.claim_outbox(id, 5, stale_before).await.unwrap().is_none());
        store.record_dispatch(id, Err("boom".into())).await.unwrap();
        let claimable = store.claimable_outbox(5, stale_before, 10).await.unwrap();
        assert_eq!(claimable.len(), 1);
        assert_eq!(claimable[0].attempts, 1);
        assert_eq!(claimable[0].last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn wallet_did_survives_jwt_clear() {
        let store = MemoryStore::new();
        store.save_jwt(UserId(5), Some("jwt".into())).await.unwrap();
        store.bind_wallet_did(UserId(5), "did:w".into()).await.unwrap();
        store.save_jwt(UserId(5), None).await.unwrap();
        let wallet = store.wallet(UserId(5)).await.unwrap().unwrap();
        assert_eq!(wallet.jwt, None);
        assert_eq!(wallet.wallet_did.as_deref(), Some("did:w"));
        let again = store.bind_wallet_did(UserId(5), "did:other".into()).await.unwrap();
        assert_eq!(again.wallet_did.as_deref(), Some("did:w"));
    }
}
