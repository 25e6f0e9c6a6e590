//! # Listing Service
//!
//! Persistent operations over the listing state machine in `nftm-state`.
//! Every mutation is handed to the store as a closure and applied under the
//! listing's (or parent purchase's) row lock; a rejected mutation writes
//! nothing.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use nftm_core::{Address, ContractId, ListingId, Price, PurchaseId, UserId};
use nftm_state::{
    CredentialRecord, Listing, ListingDraft, ListingPatch, ListingState, PurchaseDraft,
    PurchaseRecord, ResaleTerms, Seller,
};

use crate::error::MarketError;
use crate::mint::MintCoordinator;
use crate::store::{MarketStore, MintOrder};

/// Seller input for a fresh (primary) listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateListing {
    pub source_contract_id: ContractId,
    pub seller: Seller,
    pub price: Price,
    pub issue_count: i64,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

/// Listing lifecycle operations.
#[derive(Clone)]
pub struct ListingStateMachine {
    store: Arc<dyn MarketStore>,
    mints: MintCoordinator,
}

impl std::fmt::Debug for ListingStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListingStateMachine")
            .field("mints", &self.mints)
            .finish_non_exhaustive()
    }
}

impl ListingStateMachine {
    pub fn new(store: Arc<dyn MarketStore>, mints: MintCoordinator) -> Self {
        Self { store, mints }
    }

    pub async fn get(&self, id: ListingId) -> Result<Listing, MarketError> {
        self.store
            .listing(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(id.to_string()))
    }

    /// Create a primary listing in `PendingMint` and trigger its mint.
    ///
    /// The listing row and its mint outbox entry commit together; the mint
    /// itself is dispatched in the background and its failure does not undo
    /// the listing.
    #[tracing::instrument(skip_all, fields(contract_id = %request.source_contract_id))]
    pub async fn create(&self, request: CreateListing) -> Result<Listing, MarketError> {
        let contract = self
            .store
            .contract(request.source_contract_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(request.source_contract_id.to_string()))?;
        if contract.owner != request.seller.user_id {
            return Err(MarketError::Unauthorized(format!(
                "{} does not own {}",
                request.seller.user_id, contract.id
            )));
        }

        let order = MintOrder {
            asset_ref: contract.asset_id,
            product_ref: contract.product_id,
            issued_to_address: request.seller.address.clone(),
            issue_count: request.issue_count,
        };
        let draft = ListingDraft {
            source_contract_id: contract.id,
            seller: request.seller,
            price: request.price,
            issue_count: request.issue_count,
            start_date: request.start_date,
            end_date: request.end_date,
            token_range: None,
            parent_purchase: None,
            initial_state: ListingState::PendingMint,
        };
        draft.validate()?;

        let (listing, entry) = self.store.insert_listing(draft, Some(order)).await?;
        tracing::info!(listing_id = %listing.id, issue_count = listing.issue_count, "listing created");
        if let Some(entry) = entry {
            self.mints.trigger_mint(entry);
        }
        Ok(listing)
    }

    /// Resell part of a purchase.
    ///
    /// The token range is carved out of the parent purchase under its row
    /// lock, so concurrent resales of one purchase never overlap. The tokens
    /// already exist, so no mint is triggered. The listing opens immediately
    /// when `start_date` is today.
    #[tracing::instrument(skip_all, fields(parent = %parent))]
    pub async fn resell(
        &self,
        seller: Seller,
        parent: PurchaseId,
        terms: ResaleTerms,
    ) -> Result<Listing, MarketError> {
        let today = Utc::now().date_naive();
        let listing = self
            .store
            .insert_resale(
                parent,
                Box::new(move |purchase: &mut PurchaseRecord| purchase.resale_draft(seller, &terms, today)),
            )
            .await?;
        tracing::info!(
            listing_id = %listing.id,
            range = ?listing.token_range,
            state = %listing.state,
            "resale listing created"
        );
        Ok(listing)
    }

    /// Owner-requested state change.
    pub async fn update_state(
        &self,
        id: ListingId,
        caller: &Address,
        to: ListingState,
    ) -> Result<Listing, MarketError> {
        let caller = caller.clone();
        let now = Utc::now();
        let listing = self
            .store
            .update_listing(id, Box::new(move |l: &mut Listing| l.transition(&caller, to, now)))
            .await?;
        tracing::info!(listing_id = %id, state = %listing.state, "listing state updated");
        Ok(listing)
    }

    /// Patch a listing that has not been minted yet.
    pub async fn modify(
        &self,
        id: ListingId,
        caller: &Address,
        patch: ListingPatch,
    ) -> Result<Listing, MarketError> {
        let caller = caller.clone();
        let now = Utc::now();
        let resized = patch.issue_count.is_some();
        let listing = self
            .store
            .update_listing(id, Box::new(move |l: &mut Listing| l.modify(&caller, &patch, now)))
            .await?;
        if resized {
            self.resize_mint(&listing).await?;
        }
        Ok(listing)
    }

    /// Keep an undispatched mint request in step with the edition size.
    async fn resize_mint(&self, listing: &Listing) -> Result<(), MarketError> {
        let Some(entry) = self.store.outbox_for_listing(listing.id).await? else {
            return Ok(());
        };
        if entry.request.issue_count == listing.issue_count {
            return Ok(());
        }
        let status = entry.status;
        let requested = entry.request.issue_count;
        let mut request = entry.request;
        request.issue_count = listing.issue_count;
        match self.store.resize_mint_request(request).await? {
            Some(_) => {
                tracing::info!(listing_id = %listing.id, issue_count = listing.issue_count, "mint request resized")
            }
            None => tracing::warn!(
                listing_id = %listing.id,
                %status,
                requested,
                issue_count = listing.issue_count,
                "edition resized after mint dispatch; reconciliation will not bind it"
            ),
        }
        Ok(())
    }

    /// Soft-delete: the row stays, inactive and `SaleEnded`.
    pub async fn delete(&self, id: ListingId, caller: &Address) -> Result<Listing, MarketError> {
        let caller = caller.clone();
        let now = Utc::now();
        let listing = self
            .store
            .update_listing(id, Box::new(move |l: &mut Listing| l.soft_delete(&caller, now)))
            .await?;
        tracing::info!(listing_id = %id, "listing deleted");
        Ok(listing)
    }

    /// Buy `quantity` tokens; the buyer receives the next contiguous slice.
    #[tracing::instrument(skip_all, fields(listing_id = %id, quantity))]
    pub async fn purchase(
        &self,
        id: ListingId,
        buyer_id: UserId,
        buyer_address: Address,
        quantity: i64,
    ) -> Result<PurchaseRecord, MarketError> {
        let now = Utc::now();
        let record = self
            .store
            .insert_purchase(
                id,
                Box::new(move |l: &mut Listing| {
                    let token_range = l.sell(quantity, now)?;
                    Ok(PurchaseDraft {
                        listing_id: l.id,
                        contract_id: l.source_contract_id,
                        buyer_id,
                        buyer_address,
                        token_range,
                    })
                }),
            )
            .await?;
        tracing::info!(purchase_id = %record.id, range = %record.token_range, "purchase recorded");
        Ok(record)
    }

    /// Stamp an issued credential and open the sale.
    pub async fn complete_credential(
        &self,
        id: ListingId,
        record: CredentialRecord,
    ) -> Result<Listing, MarketError> {
        let now = Utc::now();
        Ok(self
            .store
            .update_listing(id, Box::new(move |l: &mut Listing| l.complete_credential(record, now)))
            .await?)
    }
}
