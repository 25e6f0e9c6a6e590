//! # Listing Lifecycle State Machine
//!
//! A listing is one sellable unit: an NFT edition of `issue_count` tokens
//! offered by a seller at a fixed price.
//!
//! ## States
//!
//! ```text
//! PendingMint (S1) ──▶ OnSale (S2) ◀──▶ SaleStopped (S3)
//!       │                 │                  │
//!       │                 ├──▶ SoldOut (S5)  │
//!       │                 ▼                  ▼
//!       └──────────▶ SaleEnded (S4) ◀────────┘
//!
//!  any non-terminal ──▶ Deleted (S6)
//! ```
//!
//! `PendingMint` is the initial state of a fresh listing. A resale whose sale
//! starts today opens directly in `OnSale`. `SaleEnded`, `SoldOut` and
//! `Deleted` are terminal: every mutation against them fails with
//! [`ListingError::AlreadyInState`].
//!
//! ## Invariants
//!
//! - `inventory_count == issue_count - sale_count` and `inventory_count >= 0`
//!   after every mutation.
//! - Once a token range is bound, `range.len() == issue_count`.
//! - A listing is never physically removed; deletion clears `active` and
//!   moves the listing to `SaleEnded`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use nftm_core::{Address, ContractId, ListingId, Price, PurchaseId, UserId, ValidationError};

use crate::allocation::{allocate_range, TokenRange, TokenRangeError};

// ─── Listing State ───────────────────────────────────────────────────

/// The lifecycle state of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingState {
    /// S1: created, waiting for the edition to be minted.
    PendingMint,
    /// S2: open for purchase.
    OnSale,
    /// S3: temporarily withdrawn by the seller.
    SaleStopped,
    /// S4: sale closed or listing soft-deleted. Terminal.
    SaleEnded,
    /// S5: every token in the edition sold. Terminal.
    SoldOut,
    /// S6: removed by an operator. Terminal.
    Deleted,
}

impl ListingState {
    /// All states in code order.
    pub const ALL: [ListingState; 6] = [
        Self::PendingMint,
        Self::OnSale,
        Self::SaleStopped,
        Self::SaleEnded,
        Self::SoldOut,
        Self::Deleted,
    ];

    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SaleEnded | Self::SoldOut | Self::Deleted)
    }

    /// The persisted state code (`S1`..`S6`).
    pub fn code(&self) -> &'static str {
        match self {
            Self::PendingMint => "S1",
            Self::OnSale => "S2",
            Self::SaleStopped => "S3",
            Self::SaleEnded => "S4",
            Self::SoldOut => "S5",
            Self::Deleted => "S6",
        }
    }

    /// Parse a persisted state code.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Human-readable description used in `AlreadyInState` errors.
    pub fn description(&self) -> &'static str {
        match self {
            Self::PendingMint => "pending mint",
            Self::OnSale => "on sale",
            Self::SaleStopped => "sale stopped",
            Self::SaleEnded => "sale ended",
            Self::SoldOut => "sold out",
            Self::Deleted => "deleted",
        }
    }

    /// States reachable from this one through an explicit status update.
    pub fn allowed_targets(&self) -> &'static [ListingState] {
        match self {
            Self::PendingMint => &[Self::OnSale, Self::SaleStopped, Self::Deleted],
            Self::OnSale => &[Self::SaleStopped, Self::SaleEnded, Self::SoldOut, Self::Deleted],
            Self::SaleStopped => &[Self::OnSale, Self::SaleEnded, Self::Deleted],
            Self::SaleEnded | Self::SoldOut | Self::Deleted => &[],
        }
    }

    /// Whether `to` is a legal target from this state.
    pub fn can_transition_to(&self, to: ListingState) -> bool {
        self.allowed_targets().contains(&to)
    }
}

impl std::fmt::Display for ListingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PendingMint => "PENDING_MINT",
            Self::OnSale => "ON_SALE",
            Self::SaleStopped => "SALE_STOPPED",
            Self::SaleEnded => "SALE_ENDED",
            Self::SoldOut => "SOLD_OUT",
            Self::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Errors raised by listing and purchase mutations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListingError {
    /// The listing is already in a terminal or conflicting state.
    #[error("listing is already {}", .state.description())]
    AlreadyInState {
        /// The state the listing is in.
        state: ListingState,
    },

    /// The requested transition is not in the whitelist.
    #[error("invalid listing transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: ListingState,
        /// Attempted target state.
        to: ListingState,
    },

    /// The caller does not own the listing or purchase.
    #[error("address {caller} does not own this record")]
    Unauthorized {
        /// The address that attempted the mutation.
        caller: Address,
    },

    /// Not enough unsold tokens remain.
    #[error("insufficient inventory: requested {requested}, available {available}")]
    InsufficientInventory {
        /// Tokens requested.
        requested: i64,
        /// Tokens still unsold.
        available: i64,
    },

    /// The edition has not been minted yet.
    #[error("listing has no minted token range yet")]
    NotMinted,

    /// A verifiable credential is already bound to the listing.
    #[error("listing already carries credential {vc_id}")]
    AlreadyCredentialed {
        /// The bound credential id.
        vc_id: String,
    },

    /// The listing is not open for sale.
    #[error("listing is not open for sale")]
    Inactive,

    /// Input failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Token range computation failed.
    #[error(transparent)]
    TokenRange(#[from] TokenRangeError),

    /// A structural invariant would be broken by the mutation.
    #[error("listing invariant violated: {0}")]
    InvariantViolation(String),
}

// ─── Value Types ─────────────────────────────────────────────────────

/// The seller of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seller {
    /// Local account of the seller.
    pub user_id: UserId,
    /// Ledger address that owns the listed tokens.
    pub address: Address,
    /// Display name.
    pub name: String,
}

/// The verifiable credential bound to a listing once issuance completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Provider-assigned credential id.
    pub vc_id: String,
    /// Name of the issuing authority.
    pub issuer_name: String,
    /// Credential type name.
    pub type_name: String,
}

/// Everything needed to insert a new listing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingDraft {
    pub source_contract_id: ContractId,
    pub seller: Seller,
    pub price: Price,
    pub issue_count: i64,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    /// Pre-allocated range (resale only; fresh listings are minted later).
    pub token_range: Option<TokenRange>,
    /// Parent allocation of a resale.
    pub parent_purchase: Option<PurchaseId>,
    pub initial_state: ListingState,
}

impl ListingDraft {
    /// Check the draft before it is persisted.
    pub fn validate(&self) -> Result<(), ListingError> {
        if self.issue_count <= 0 {
            return Err(ValidationError::NonPositiveCount {
                field: "issue_count",
                value: self.issue_count,
            }
            .into());
        }
        if self.seller.name.trim().is_empty() {
            return Err(ValidationError::Empty("seller name").into());
        }
        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(ListingError::InvariantViolation(format!(
                    "sale ends {end} before it starts {}",
                    self.start_date
                )));
            }
        }
        if let Some(range) = self.token_range {
            if range.len() != self.issue_count {
                return Err(ListingError::InvariantViolation(format!(
                    "token range {range} does not hold {} tokens",
                    self.issue_count
                )));
            }
        }
        if !matches!(self.initial_state, ListingState::PendingMint | ListingState::OnSale) {
            return Err(ListingError::InvariantViolation(format!(
                "listing cannot start in {}",
                self.initial_state
            )));
        }
        Ok(())
    }

    /// Materialize the draft with its store-assigned id.
    pub fn into_listing(self, id: ListingId, now: DateTime<Utc>) -> Listing {
        Listing {
            id,
            source_contract_id: self.source_contract_id,
            seller: self.seller,
            price: self.price,
            issue_count: self.issue_count,
            sale_count: 0,
            inventory_count: self.issue_count,
            token_range: self.token_range,
            state: self.initial_state,
            parent_purchase: self.parent_purchase,
            active: true,
            start_date: self.start_date,
            end_date: self.end_date,
            credential: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fields a seller may change while the listing is still pending mint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingPatch {
    pub price: Option<Price>,
    pub issue_count: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

// ─── Listing ─────────────────────────────────────────────────────────

/// A market listing with its lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    /// The owned asset contract this edition is minted against.
    pub source_contract_id: ContractId,
    pub seller: Seller,
    pub price: Price,
    pub issue_count: i64,
    pub sale_count: i64,
    pub inventory_count: i64,
    /// `None` until the minter reports token ids.
    pub token_range: Option<TokenRange>,
    pub state: ListingState,
    /// Set for resale listings.
    pub parent_purchase: Option<PurchaseId>,
    pub active: bool,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub credential: Option<CredentialRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    /// Whether this listing resells tokens out of a prior purchase.
    pub fn resale_flag(&self) -> bool {
        self.parent_purchase.is_some()
    }

    /// Whether the minter's result has been bound.
    pub fn is_minted(&self) -> bool {
        self.token_range.is_some()
    }

    /// Reject callers other than the seller.
    pub fn authorize(&self, caller: &Address) -> Result<(), ListingError> {
        if &self.seller.address != caller {
            return Err(ListingError::Unauthorized {
                caller: caller.clone(),
            });
        }
        Ok(())
    }

    /// Owner-requested status change, checked against the whitelist.
    pub fn transition(
        &mut self,
        caller: &Address,
        to: ListingState,
        now: DateTime<Utc>,
    ) -> Result<(), ListingError> {
        self.authorize(caller)?;
        if self.state.is_terminal() || self.state == to {
            return Err(ListingError::AlreadyInState { state: self.state });
        }
        if !self.state.can_transition_to(to) {
            return Err(ListingError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        let mut next = self.clone();
        if to.is_terminal() {
            next.active = false;
        }
        next.state = to;
        next.updated_at = now;
        next.check_invariants()?;
        *self = next;
        Ok(())
    }

    /// Apply a seller patch. Only allowed before minting (`PendingMint`).
    pub fn modify(
        &mut self,
        caller: &Address,
        patch: &ListingPatch,
        now: DateTime<Utc>,
    ) -> Result<(), ListingError> {
        self.authorize(caller)?;
        if self.state != ListingState::PendingMint {
            return Err(ListingError::AlreadyInState { state: self.state });
        }

        let mut next = self.clone();
        if let Some(price) = patch.price {
            next.price = price;
        }
        if let Some(issue_count) = patch.issue_count {
            if issue_count <= 0 {
                return Err(ValidationError::NonPositiveCount {
                    field: "issue_count",
                    value: issue_count,
                }
                .into());
            }
            if next.token_range.is_some() && issue_count != next.issue_count {
                return Err(ListingError::InvariantViolation(
                    "edition size is fixed once tokens are minted".to_string(),
                ));
            }
            if issue_count < next.sale_count {
                return Err(ListingError::InsufficientInventory {
                    requested: next.sale_count,
                    available: issue_count,
                });
            }
            next.issue_count = issue_count;
            next.inventory_count = issue_count - next.sale_count;
        }
        if let Some(start) = patch.start_date {
            next.start_date = start;
        }
        if let Some(end) = patch.end_date {
            next.end_date = Some(end);
        }
        if let Some(end) = next.end_date {
            if end < next.start_date {
                return Err(ListingError::InvariantViolation(format!(
                    "sale ends {end} before it starts {}",
                    next.start_date
                )));
            }
        }
        next.updated_at = now;
        next.check_invariants()?;
        *self = next;
        Ok(())
    }

    /// Soft-delete: clear `active` and close the sale.
    ///
    /// Refused once the listing is in any terminal state.
    pub fn soft_delete(&mut self, caller: &Address, now: DateTime<Utc>) -> Result<(), ListingError> {
        self.authorize(caller)?;
        if self.state.is_terminal() {
            return Err(ListingError::AlreadyInState { state: self.state });
        }
        self.active = false;
        self.state = ListingState::SaleEnded;
        self.updated_at = now;
        Ok(())
    }

    /// Bind the token range reported by the minter.
    ///
    /// Idempotent for the same range; a different range is an invariant
    /// violation.
    pub fn bind_token_range(
        &mut self,
        range: TokenRange,
        now: DateTime<Utc>,
    ) -> Result<(), ListingError> {
        if let Some(bound) = self.token_range {
            if bound == range {
                return Ok(());
            }
            return Err(ListingError::InvariantViolation(format!(
                "listing already bound to {bound}, refusing {range}"
            )));
        }
        if range.len() != self.issue_count {
            return Err(ListingError::InvariantViolation(format!(
                "minted range {range} does not hold {} tokens",
                self.issue_count
            )));
        }
        self.token_range = Some(range);
        self.updated_at = now;
        Ok(())
    }

    /// Stamp an issued credential and open the sale.
    pub fn complete_credential(
        &mut self,
        record: CredentialRecord,
        now: DateTime<Utc>,
    ) -> Result<(), ListingError> {
        if self.state.is_terminal() {
            return Err(ListingError::AlreadyInState { state: self.state });
        }
        if let Some(existing) = &self.credential {
            return Err(ListingError::AlreadyCredentialed {
                vc_id: existing.vc_id.clone(),
            });
        }
        if self.token_range.is_none() {
            return Err(ListingError::NotMinted);
        }
        self.credential = Some(record);
        self.state = ListingState::OnSale;
        self.updated_at = now;
        Ok(())
    }

    /// Sell `quantity` tokens, returning the buyer's sub-range.
    ///
    /// Moves the listing to `SoldOut` when the last token goes.
    pub fn sell(&mut self, quantity: i64, now: DateTime<Utc>) -> Result<TokenRange, ListingError> {
        if !self.active || self.state != ListingState::OnSale {
            return Err(ListingError::Inactive);
        }
        let range = self.token_range.ok_or(ListingError::NotMinted)?;
        if quantity <= 0 {
            return Err(ValidationError::NonPositiveCount {
                field: "quantity",
                value: quantity,
            }
            .into());
        }
        if quantity > self.inventory_count {
            return Err(ListingError::InsufficientInventory {
                requested: quantity,
                available: self.inventory_count,
            });
        }
        let sold = allocate_range(range.from(), self.sale_count, quantity)?;
        if !range.covers(&sold) {
            return Err(ListingError::InvariantViolation(format!(
                "allocated {sold} outside edition {range}"
            )));
        }
        self.sale_count += quantity;
        self.inventory_count -= quantity;
        if self.inventory_count == 0 {
            self.state = ListingState::SoldOut;
        }
        self.updated_at = now;
        self.check_invariants()?;
        Ok(sold)
    }

    /// Verify the structural invariants of the row.
    ///
    /// Besides the inventory arithmetic, an `OnSale` listing must carry its
    /// token range and a `SoldOut` listing must have no inventory left.
    pub fn check_invariants(&self) -> Result<(), ListingError> {
        if self.state == ListingState::OnSale && self.token_range.is_none() {
            return Err(ListingError::NotMinted);
        }
        if self.state == ListingState::SoldOut && self.inventory_count != 0 {
            return Err(ListingError::InvariantViolation(format!(
                "sold out with {} tokens unsold",
                self.inventory_count
            )));
        }
        if self.inventory_count != self.issue_count - self.sale_count {
            return Err(ListingError::InvariantViolation(format!(
                "inventory {} != issue {} - sale {}",
                self.inventory_count, self.issue_count, self.sale_count
            )));
        }
        if self.inventory_count < 0 {
            return Err(ListingError::InvariantViolation(format!(
                "negative inventory {}",
                self.inventory_count
            )));
        }
        if let Some(range) = self.token_range {
            if range.len() != self.issue_count {
                return Err(ListingError::InvariantViolation(format!(
                    "range {range} does not hold {} tokens",
                    self.issue_count
                )));
            }
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
