//! # Purchase Records and Resale
//!
//! A purchase is the buyer's contiguous slice of a listing's edition. It
//! carries its own `issue/sale/inventory` counters so that the buyer can
//! resell part of it: each resale carves the next sub-range out of the
//! purchase and advances the purchase's `sale_count` in the same step.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use nftm_core::{Address, ContractId, ListingId, Price, PurchaseId, UserId, ValidationError};

use crate::allocation::{allocate_range, TokenRange};
use crate::listing::{ListingDraft, ListingError, ListingState, Seller};

/// A buyer's allocation out of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: PurchaseId,
    pub listing_id: ListingId,
    /// Contract of the listing the tokens were bought from.
    pub contract_id: ContractId,
    pub buyer_id: UserId,
    pub buyer_address: Address,
    pub issue_count: i64,
    pub sale_count: i64,
    pub inventory_count: i64,
    pub token_range: TokenRange,
    pub created_at: DateTime<Utc>,
}

/// A purchase before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseDraft {
    pub listing_id: ListingId,
    pub contract_id: ContractId,
    pub buyer_id: UserId,
    pub buyer_address: Address,
    pub token_range: TokenRange,
}

impl PurchaseDraft {
    /// Materialize with the store-assigned id.
    pub fn into_record(self, id: PurchaseId, now: DateTime<Utc>) -> PurchaseRecord {
        let issue_count = self.token_range.len();
        PurchaseRecord {
            id,
            listing_id: self.listing_id,
            contract_id: self.contract_id,
            buyer_id: self.buyer_id,
            buyer_address: self.buyer_address,
            issue_count,
            sale_count: 0,
            inventory_count: issue_count,
            token_range: self.token_range,
            created_at: now,
        }
    }
}

/// Seller-supplied terms of a resale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResaleTerms {
    pub price: Price,
    pub issue_count: i64,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl PurchaseRecord {
    /// Carve a resale listing out of this purchase.
    ///
    /// Must run under the purchase's row lock: on success `sale_count` and
    /// `inventory_count` have already been advanced, and the caller persists
    /// both the updated purchase and the returned draft in one transaction.
    /// On error the record is untouched.
    pub fn resale_draft(
        &mut self,
        seller: Seller,
        terms: &ResaleTerms,
        today: NaiveDate,
    ) -> Result<ListingDraft, ListingError> {
        if seller.address != self.buyer_address {
            return Err(ListingError::Unauthorized {
                caller: seller.address,
            });
        }
        if terms.issue_count <= 0 {
            return Err(ValidationError::NonPositiveCount {
                field: "issue_count",
                value: terms.issue_count,
            }
            .into());
        }
        if terms.issue_count > self.inventory_count {
            return Err(ListingError::InsufficientInventory {
                requested: terms.issue_count,
                available: self.inventory_count,
            });
        }

        let range = allocate_range(self.token_range.from(), self.sale_count, terms.issue_count)?;
        if !self.token_range.covers(&range) {
            return Err(ListingError::InvariantViolation(format!(
                "resale range {range} escapes purchase {}",
                self.token_range
            )));
        }

        let initial_state = if terms.start_date == today {
            ListingState::OnSale
        } else {
            ListingState::PendingMint
        };
        let draft = ListingDraft {
            source_contract_id: self.contract_id,
            seller,
            price: terms.price,
            issue_count: terms.issue_count,
            start_date: terms.start_date,
            end_date: terms.end_date,
            token_range: Some(range),
            parent_purchase: Some(self.id),
            initial_state,
        };
        draft.validate()?;

        self.sale_count += terms.issue_count;
        self.inventory_count -= terms.issue_count;
        Ok(draft)
    }

    /// Verify `inventory == issue - sale` and the range length.
    pub fn check_invariants(&self) -> Result<(), ListingError> {
        if self.inventory_count != self.issue_count - self.sale_count || self.inventory_count < 0 {
            return Err(ListingError::InvariantViolation(format!(
                "purchase {} inventory {} != issue {} - sale {}",
                self.id, self.inventory_count, self.issue_count, self.sale_count
            )));
        }
        if self.token_range.len() != self.issue_count {
            return Err(ListingError::InvariantViolation(format!(
                "purchase {} range {} does not hold {} tokens",
                self.id, self.token_range, self.issue_count
            )));
        }
        Ok(())
    }
}
