//! Postgres [`MarketStore`](super::MarketStore) via `sqlx`.
//!
//! Runtime queries with bound parameters only. Every read-modify-write is
//! one transaction that locks its row with `SELECT ... FOR UPDATE`; the
//! domain closure runs while the lock is held. Returning early with `?`
//! drops the transaction, which rolls it back.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use nftm_core::{Address, AssetId, ContractId, ListingId, Price, ProductId, PurchaseId, TokenId, UserId};
use nftm_gateway::MintRequest;
use nftm_state::{
    CredentialRecord, IdentityWalletRef, Listing, ListingDraft, ListingState, MintRecord,
    PurchaseRecord, Seller, TokenRange, TransferRecord,
};

use super::{
    CatalogStore, IdentityStore, LedgerStore, ListingStore, ListingUpdate, MintOrder, NewAsset,
    NewContract, NewProduct, NewUser, OutboxEntry, OutboxStatus, OutboxStore, PurchaseAllocation,
    ResaleAllocation, SourceContract, UserRecord,
};
use crate::error::StoreError;

/// Open the connection pool and apply embedded migrations.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn corrupt(what: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(what.to_string())
}

// ─── Row types ───────────────────────────────────────────────────────

const LISTING_COLUMNS: &str = "id, source_contract_id, seller_id, seller_address, seller_name, \
     price, issue_count, sale_count, inventory_count, from_token_id, to_token_id, state, \
     parent_purchase_id, active, start_date, end_date, vc_id, vc_issuer_name, vc_type_name, \
     created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ListingRow {
    id: i64,
    source_contract_id: i64,
    seller_id: i64,
    seller_address: String,
    seller_name: String,
    price: i64,
    issue_count: i64,
    sale_count: i64,
    inventory_count: i64,
    from_token_id: Option<i64>,
    to_token_id: Option<i64>,
    state: String,
    parent_purchase_id: Option<i64>,
    active: bool,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    vc_id: Option<String>,
    vc_issuer_name: Option<String>,
    vc_type_name: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ListingRow {
    fn into_listing(self) -> Result<Listing, StoreError> {
        let token_range = match (self.from_token_id, self.to_token_id) {
            (Some(from), Some(to)) => Some(TokenRange::new(TokenId(from), TokenId(to)).map_err(corrupt)?),
            (None, None) => None,
            _ => return Err(corrupt(format!("listing {} has half a token range", self.id))),
        };
        let state = ListingState::from_code(&self.state)
            .ok_or_else(|| corrupt(format!("listing {} has unknown state {}", self.id, self.state)))?;
        let credential = match (self.vc_id, self.vc_issuer_name, self.vc_type_name) {
            (Some(vc_id), issuer, type_name) => Some(CredentialRecord {
                vc_id,
                issuer_name: issuer.unwrap_or_default(),
                type_name: type_name.unwrap_or_default(),
            }),
            _ => None,
        };
        Ok(Listing {
            id: ListingId(self.id),
            source_contract_id: ContractId(self.source_contract_id),
            seller: Seller {
                user_id: UserId(self.seller_id),
                address: Address::new(self.seller_address).map_err(corrupt)?,
                name: self.seller_name,
            },
            price: Price::new(self.price).map_err(corrupt)?,
            issue_count: self.issue_count,
            sale_count: self.sale_count,
            inventory_count: self.inventory_count,
            token_range,
            state,
            parent_purchase: self.parent_purchase_id.map(PurchaseId),
            active: self.active,
            start_date: self.start_date,
            end_date: self.end_date,
            credential,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const PURCHASE_COLUMNS: &str = "id, listing_id, contract_id, buyer_id, buyer_address, issue_count, \
     sale_count, inventory_count, from_token_id, to_token_id, created_at";

#[derive(sqlx::FromRow)]
struct PurchaseRow {
    id: i64,
    listing_id: i64,
    contract_id: i64,
    buyer_id: i64,
    buyer_address: String,
    issue_count: i64,
    sale_count: i64,
    inventory_count: i64,
    from_token_id: i64,
    to_token_id: i64,
    created_at: DateTime<Utc>,
}

impl PurchaseRow {
    fn into_record(self) -> Result<PurchaseRecord, StoreError> {
        Ok(PurchaseRecord {
            id: PurchaseId(self.id),
            listing_id: ListingId(self.listing_id),
            contract_id: ContractId(self.contract_id),
            buyer_id: UserId(self.buyer_id),
            buyer_address: Address::new(self.buyer_address).map_err(corrupt)?,
            issue_count: self.issue_count,
            sale_count: self.sale_count,
            inventory_count: self.inventory_count,
            token_range: TokenRange::new(TokenId(self.from_token_id), TokenId(self.to_token_id))
                .map_err(corrupt)?,
            created_at: self.created_at,
        })
    }
}

const OUTBOX_COLUMNS: &str =
    "id, listing_id, request, status, attempts, last_error, created_at, updated_at, checked_at";

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    listing_id: i64,
    request: Json<MintRequest>,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    checked_at: Option<DateTime<Utc>>,
}

impl OutboxRow {
    fn into_entry(self) -> Result<OutboxEntry, StoreError> {
        let status = OutboxStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("outbox {} has unknown status {}", self.id, self.status)))?;
        Ok(OutboxEntry {
            id: self.id,
            listing_id: ListingId(self.listing_id),
            request: self.request.0,
            status,
            attempts: self.attempts,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
            checked_at: self.checked_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MintRow {
    token_id: i64,
    issued_to: String,
    contract_id: i64,
    tx_id: String,
    listing_id: Option<i64>,
}

impl MintRow {
    fn into_record(self) -> Result<MintRecord, StoreError> {
        Ok(MintRecord {
            token_id: TokenId(self.token_id),
            issued_to: Address::new(self.issued_to).map_err(corrupt)?,
            contract_id: ContractId(self.contract_id),
            tx_id: self.tx_id,
            listing_id: self.listing_id.map(ListingId),
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransferRow {
    token_id: i64,
    to_address: String,
    sequence_no: i64,
    contract_id: i64,
    tx_id: String,
}

impl TransferRow {
    fn into_record(self) -> Result<TransferRecord, StoreError> {
        Ok(TransferRecord {
            token_id: TokenId(self.token_id),
            to_address: Address::new(self.to_address).map_err(corrupt)?,
            sequence_no: self.sequence_no,
            contract_id: ContractId(self.contract_id),
            tx_id: self.tx_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: String,
    nickname: String,
    address: Option<String>,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_record(self) -> Result<UserRecord, StoreError> {
        Ok(UserRecord {
            id: UserId(self.id),
            email: self.email,
            nickname: self.nickname,
            address: self.address.map(Address::new).transpose().map_err(corrupt)?,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WalletRow {
    owner_id: i64,
    jwt: Option<String>,
    wallet_did: Option<String>,
    vc_type: Option<String>,
}

impl WalletRow {
    fn into_wallet(self) -> IdentityWalletRef {
        IdentityWalletRef {
            owner: UserId(self.owner_id),
            jwt: self.jwt,
            wallet_did: self.wallet_did,
            vc_type: self.vc_type,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ContractRow {
    id: i64,
    owner_id: i64,
    product_id: i64,
    asset_id: i64,
    created_at: DateTime<Utc>,
}

impl ContractRow {
    fn into_record(self) -> SourceContract {
        SourceContract {
            id: ContractId(self.id),
            owner: UserId(self.owner_id),
            product_id: ProductId(self.product_id),
            asset_id: AssetId(self.asset_id),
            created_at: self.created_at,
        }
    }
}

// ─── Transaction helpers ─────────────────────────────────────────────

async fn lock_listing(
    tx: &mut Transaction<'_, Postgres>,
    id: ListingId,
) -> Result<Listing, StoreError> {
    let row = sqlx::query_as::<_, ListingRow>(&format!(
        "SELECT {LISTING_COLUMNS} FROM market_listings WHERE id = $1 FOR UPDATE"
    ))
    .bind(id.get())
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    row.into_listing()
}

async fn write_listing(tx: &mut Transaction<'_, Postgres>, l: &Listing) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE market_listings SET price = $1, issue_count = $2, sale_count = $3, \
         inventory_count = $4, from_token_id = $5, to_token_id = $6, state = $7, active = $8, \
         start_date = $9, end_date = $10, vc_id = $11, vc_issuer_name = $12, vc_type_name = $13, \
         updated_at = $14 WHERE id = $15",
    )
    .bind(l.price.minor_units())
    .bind(l.issue_count)
    .bind(l.sale_count)
    .bind(l.inventory_count)
    .bind(l.token_range.map(|r| r.from().get()))
    .bind(l.token_range.map(|r| r.to().get()))
    .bind(l.state.code())
    .bind(l.active)
    .bind(l.start_date)
    .bind(l.end_date)
    .bind(l.credential.as_ref().map(|c| c.vc_id.as_str()))
    .bind(l.credential.as_ref().map(|c| c.issuer_name.as_str()))
    .bind(l.credential.as_ref().map(|c| c.type_name.as_str()))
    .bind(l.updated_at)
    .bind(l.id.get())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_listing_row(
    tx: &mut Transaction<'_, Postgres>,
    draft: ListingDraft,
    now: DateTime<Utc>,
) -> Result<Listing, StoreError> {
    let row = sqlx::query_as::<_, ListingRow>(&format!(
        "INSERT INTO market_listings (source_contract_id, seller_id, seller_address, seller_name, \
         price, issue_count, sale_count, inventory_count, from_token_id, to_token_id, state, \
         parent_purchase_id, active, start_date, end_date, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, 0, $6, $7, $8, $9, $10, TRUE, $11, $12, $13, $13) \
         RETURNING {LISTING_COLUMNS}"
    ))
    .bind(draft.source_contract_id.get())
    .bind(draft.seller.user_id.get())
    .bind(draft.seller.address.as_str())
    .bind(&draft.seller.name)
    .bind(draft.price.minor_units())
    .bind(draft.issue_count)
    .bind(draft.token_range.map(|r| r.from().get()))
    .bind(draft.token_range.map(|r| r.to().get()))
    .bind(draft.initial_state.code())
    .bind(draft.parent_purchase.map(|p| p.get()))
    .bind(draft.start_date)
    .bind(draft.end_date)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;
    row.into_listing()
}

// ─── Listings ────────────────────────────────────────────────────────

#[async_trait]
impl ListingStore for PgStore {
    async fn contract(&self, id: ContractId) -> Result<Option<SourceContract>, StoreError> {
        let row = sqlx::query_as::<_, ContractRow>(
            "SELECT id, owner_id, product_id, asset_id, created_at FROM contracts WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ContractRow::into_record))
    }

    async fn listing(&self, id: ListingId) -> Result<Option<Listing>, StoreError> {
        let row = sqlx::query_as::<_, ListingRow>(&format!(
            "SELECT {LISTING_COLUMNS} FROM market_listings WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.map(ListingRow::into_listing).transpose()
    }

    async fn purchase_record(&self, id: PurchaseId) -> Result<Option<PurchaseRecord>, StoreError> {
        let row = sqlx::query_as::<_, PurchaseRow>(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.map(PurchaseRow::into_record).transpose()
    }

    async fn insert_listing(
        &self,
        draft: ListingDraft,
        mint: Option<MintOrder>,
    ) -> Result<(Listing, Option<OutboxEntry>), StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let listing = insert_listing_row(&mut tx, draft, now).await?;

        let entry = match mint {
            Some(order) => {
                let entry = OutboxEntry::new(order.for_listing(listing.id), now);
                sqlx::query(
                    "INSERT INTO mint_outbox (id, listing_id, request, status, attempts, \
                     last_error, created_at, updated_at) VALUES ($1, $2, $3, $4, 0, NULL, $5, $5)",
                )
                .bind(entry.id)
                .bind(entry.listing_id.get())
                .bind(Json(&entry.request))
                .bind(entry.status.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await?;
                Some(entry)
            }
            None => None,
        };

        tx.commit().await?;
        Ok((listing, entry))
    }

    async fn update_listing(&self, id: ListingId, update: ListingUpdate) -> Result<Listing, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut listing = lock_listing(&mut tx, id).await?;
        update(&mut listing)?;
        listing.check_invariants()?;
        write_listing(&mut tx, &listing).await?;
        tx.commit().await?;
        Ok(listing)
    }

    async fn insert_resale(
        &self,
        parent: PurchaseId,
        allocate: ResaleAllocation,
    ) -> Result<Listing, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut purchase = sqlx::query_as::<_, PurchaseRow>(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1 FOR UPDATE"
        ))
        .bind(parent.get())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(parent.to_string()))?
        .into_record()?;

        let draft = allocate(&mut purchase)?;
        purchase.check_invariants()?;

        sqlx::query("UPDATE purchases SET sale_count = $1, inventory_count = $2 WHERE id = $3")
            .bind(purchase.sale_count)
            .bind(purchase.inventory_count)
            .bind(parent.get())
            .execute(&mut *tx)
            .await?;
        let listing = insert_listing_row(&mut tx, draft, now).await?;

        tx.commit().await?;
        Ok(listing)
    }

    async fn insert_purchase(
        &self,
        listing_id: ListingId,
        allocate: PurchaseAllocation,
    ) -> Result<PurchaseRecord, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut listing = lock_listing(&mut tx, listing_id).await?;

        let draft = allocate(&mut listing)?;
        listing.check_invariants()?;
        write_listing(&mut tx, &listing).await?;

        let range = draft.token_range;
        let row = sqlx::query_as::<_, PurchaseRow>(&format!(
            "INSERT INTO purchases (listing_id, contract_id, buyer_id, buyer_address, issue_count, \
             sale_count, inventory_count, from_token_id, to_token_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, 0, $5, $6, $7, $8) RETURNING {PURCHASE_COLUMNS}"
        ))
        .bind(draft.listing_id.get())
        .bind(draft.contract_id.get())
        .bind(draft.buyer_id.get())
        .bind(draft.buyer_address.as_str())
        .bind(range.len())
        .bind(range.from().get())
        .bind(range.to().get())
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.into_record()
    }
}

// ─── Ledger ──────────────────────────────────────────────────────────

#[async_trait]
impl LedgerStore for PgStore {
    async fn mints_for_listing(&self, listing: ListingId) -> Result<Vec<MintRecord>, StoreError> {
        let rows = sqlx::query_as::<_, MintRow>(
            "SELECT token_id, issued_to, contract_id, tx_id, listing_id FROM nft_mints \
             WHERE listing_id = $1 ORDER BY token_id",
        )
        .bind(listing.get())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MintRow::into_record).collect()
    }

    async fn mints_for_tokens(&self, tokens: &[TokenId]) -> Result<Vec<MintRecord>, StoreError> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = tokens.iter().map(TokenId::get).collect();
        let rows = sqlx::query_as::<_, MintRow>(
            "SELECT token_id, issued_to, contract_id, tx_id, listing_id FROM nft_mints \
             WHERE token_id = ANY($1) ORDER BY token_id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MintRow::into_record).collect()
    }

    async fn transfers_in_range(&self, range: TokenRange) -> Result<Vec<TransferRecord>, StoreError> {
        let rows = sqlx::query_as::<_, TransferRow>(
            "SELECT token_id, to_address, sequence_no, contract_id, tx_id FROM nft_transfers \
             WHERE token_id BETWEEN $1 AND $2",
        )
        .bind(range.from().get())
        .bind(range.to().get())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TransferRow::into_record).collect()
    }
}

// ─── Outbox ──────────────────────────────────────────────────────────

const CLAIMABLE: &str = "(status = 'pending' \
     OR (status = 'failed' AND attempts < $1) \
     OR (status = 'dispatching' AND updated_at < $2))";

#[async_trait]
impl OutboxStore for PgStore {
    async fn outbox_for_listing(&self, listing: ListingId) -> Result<Option<OutboxEntry>, StoreError> {
        let row = sqlx::query_as::<_, OutboxRow>(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM mint_outbox WHERE listing_id = $1"
        ))
        .bind(listing.get())
        .fetch_optional(&self.pool)
        .await?;
        row.map(OutboxRow::into_entry).transpose()
    }

    async fn requeue_mint(&self, request: MintRequest) -> Result<OutboxEntry, StoreError> {
        let fresh = OutboxEntry::new(request, Utc::now());
        let mut tx = self.pool.begin().await?;
        let reset = sqlx::query_as::<_, OutboxRow>(&format!(
            "INSERT INTO mint_outbox (id, listing_id, request, status, attempts, last_error, \
             created_at, updated_at) VALUES ($1, $2, $3, 'pending', 0, NULL, $4, $4) \
             ON CONFLICT (listing_id) DO UPDATE SET request = EXCLUDED.request, \
             status = 'pending', attempts = 0, last_error = NULL, checked_at = NULL, \
             updated_at = EXCLUDED.updated_at WHERE mint_outbox.status = 'failed' \
             RETURNING {OUTBOX_COLUMNS}"
        ))
        .bind(fresh.id)
        .bind(fresh.listing_id.get())
        .bind(Json(&fresh.request))
        .bind(fresh.created_at)
        .fetch_optional(&mut *tx)
        .await?;

        // No row back means the conflict update was skipped: the entry
        // exists and is not failed.
        let row = match reset {
            Some(row) => row,
            None => {
                sqlx::query_as::<_, OutboxRow>(&format!(
                    "SELECT {OUTBOX_COLUMNS} FROM mint_outbox WHERE listing_id = $1"
                ))
                .bind(fresh.listing_id.get())
                .fetch_one(&mut *tx)
                .await?
            }
        };
        tx.commit().await?;
        row.into_entry()
    }

    async fn resize_mint_request(&self, request: MintRequest) -> Result<Option<OutboxEntry>, StoreError> {
        let row = sqlx::query_as::<_, OutboxRow>(&format!(
            "UPDATE mint_outbox SET request = $1, updated_at = $2 \
             WHERE listing_id = $3 AND status IN ('pending', 'failed') RETURNING {OUTBOX_COLUMNS}"
        ))
        .bind(Json(&request))
        .bind(Utc::now())
        .bind(request.market_listing_id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.map(OutboxRow::into_entry).transpose()
    }

    async fn claimable_outbox(
        &self,
        max_attempts: i32,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let rows = sqlx::query_as::<_, OutboxRow>(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM mint_outbox WHERE {CLAIMABLE} \
             ORDER BY created_at LIMIT $3"
        ))
        .bind(max_attempts)
        .bind(stale_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OutboxRow::into_entry).collect()
    }

    async fn claim_outbox(
        &self,
        id: Uuid,
        max_attempts: i32,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<OutboxEntry>, StoreError> {
        let row = sqlx::query_as::<_, OutboxRow>(&format!(
            "UPDATE mint_outbox SET status = 'dispatching', updated_at = $3 \
             WHERE id = $4 AND {CLAIMABLE} RETURNING {OUTBOX_COLUMNS}"
        ))
        .bind(max_attempts)
        .bind(stale_before)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(OutboxRow::into_entry).transpose()
    }

    async fn record_dispatch(&self, id: Uuid, outcome: Result<(), String>) -> Result<(), StoreError> {
        let (status, error) = match outcome {
            Ok(()) => (OutboxStatus::Dispatched, None),
            Err(message) => (OutboxStatus::Failed, Some(message)),
        };
        let result = sqlx::query(
            "UPDATE mint_outbox SET status = $1, last_error = $2, attempts = attempts + 1, \
             updated_at = $3 WHERE id = $4",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("outbox entry {id}")));
        }
        Ok(())
    }

    async fn next_dispatched(&self, limit: i64) -> Result<Vec<OutboxEntry>, StoreError> {
        let rows = sqlx::query_as::<_, OutboxRow>(&format!(
            "UPDATE mint_outbox SET checked_at = $1 WHERE id IN ( \
                 SELECT id FROM mint_outbox WHERE status = 'dispatched' \
                 ORDER BY checked_at NULLS FIRST, created_at LIMIT $2 \
                 FOR UPDATE SKIP LOCKED) \
             RETURNING {OUTBOX_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OutboxRow::into_entry).collect()
    }

    async fn expire_dispatched(
        &self,
        id: Uuid,
        dispatched_before: DateTime<Utc>,
        reason: String,
    ) -> Result<Option<OutboxEntry>, StoreError> {
        let row = sqlx::query_as::<_, OutboxRow>(&format!(
            "UPDATE mint_outbox SET status = 'failed', last_error = $1, updated_at = $2 \
             WHERE id = $3 AND status = 'dispatched' AND updated_at < $4 \
             RETURNING {OUTBOX_COLUMNS}"
        ))
        .bind(reason)
        .bind(Utc::now())
        .bind(id)
        .bind(dispatched_before)
        .fetch_optional(&self.pool)
        .await?;
        row.map(OutboxRow::into_entry).transpose()
    }

    async fn complete_outbox(&self, listing: ListingId) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE mint_outbox SET status = 'completed', updated_at = $1 \
             WHERE listing_id = $2 AND status <> 'completed'",
        )
        .bind(Utc::now())
        .bind(listing.get())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ─── Identity ────────────────────────────────────────────────────────

#[async_trait]
impl IdentityStore for PgStore {
    async fn user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, nickname, address, created_at FROM users WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRow::into_record).transpose()
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, nickname, address, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRow::into_record).transpose()
    }

    async fn ensure_user(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO users (email, nickname) VALUES ($1, $2) ON CONFLICT (email) DO NOTHING")
            .bind(&user.email)
            .bind(&user.nickname)
            .execute(&mut *tx)
            .await?;
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, nickname, address, created_at FROM users WHERE email = $1",
        )
        .bind(&user.email)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        row.into_record()
    }

    async fn wallet(&self, owner: UserId) -> Result<Option<IdentityWalletRef>, StoreError> {
        let row = sqlx::query_as::<_, WalletRow>(
            "SELECT owner_id, jwt, wallet_did, vc_type FROM did_wallets WHERE owner_id = $1",
        )
        .bind(owner.get())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(WalletRow::into_wallet))
    }

    async fn save_jwt(&self, owner: UserId, jwt: Option<String>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO did_wallets (owner_id, jwt, updated_at) VALUES ($1, $2, $3) \
             ON CONFLICT (owner_id) DO UPDATE SET jwt = EXCLUDED.jwt, updated_at = EXCLUDED.updated_at",
        )
        .bind(owner.get())
        .bind(jwt)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn bind_wallet_did(&self, owner: UserId, did: String) -> Result<IdentityWalletRef, StoreError> {
        let row = sqlx::query_as::<_, WalletRow>(
            "INSERT INTO did_wallets (owner_id, wallet_did, updated_at) VALUES ($1, $2, $3) \
             ON CONFLICT (owner_id) DO UPDATE \
             SET wallet_did = COALESCE(did_wallets.wallet_did, EXCLUDED.wallet_did), \
                 updated_at = EXCLUDED.updated_at \
             RETURNING owner_id, jwt, wallet_did, vc_type",
        )
        .bind(owner.get())
        .bind(did)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_wallet())
    }
}

// ─── Catalog ─────────────────────────────────────────────────────────

#[async_trait]
impl CatalogStore for PgStore {
    async fn create_product(&self, product: NewProduct) -> Result<ProductId, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO products (owner_id, name, description) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(product.owner.get())
        .bind(&product.name)
        .bind(&product.description)
        .fetch_one(&self.pool)
        .await?;
        Ok(ProductId(id))
    }

    async fn create_asset(&self, asset: NewAsset) -> Result<AssetId, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO assets (owner_id, product_id, file_name, content_type) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(asset.owner.get())
        .bind(asset.product_id.get())
        .bind(&asset.file_name)
        .bind(&asset.content_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(AssetId(id))
    }

    async fn create_contract(&self, contract: NewContract) -> Result<SourceContract, StoreError> {
        let row = sqlx::query_as::<_, ContractRow>(
            "INSERT INTO contracts (owner_id, product_id, asset_id) VALUES ($1, $2, $3) \
             RETURNING id, owner_id, product_id, asset_id, created_at",
        )
        .bind(contract.owner.get())
        .bind(contract.product_id.get())
        .bind(contract.asset_id.get())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_record())
    }
}
