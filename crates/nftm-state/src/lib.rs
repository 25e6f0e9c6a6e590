//! # nftm-state — Listing Lifecycle and Token Allocation
//!
//! Pure, synchronous domain logic for the market saga. Nothing in this crate
//! performs I/O: the stores in `nftm-saga` load a record, hand a `&mut` to
//! the functions here under a row lock, and persist the result.
//!
//! ## State Machines
//!
//! - **Listing** (`listing.rs`): `PendingMint → OnSale → SaleStopped →
//!   SaleEnded / SoldOut / Deleted`, with a transition whitelist, an
//!   owner-authorization check and the pre-mint-only `modify` guard.
//!
//! - **Allocation** (`allocation.rs`): contiguous token ranges carved out of
//!   a parent allocation. Non-overlap holds as long as the parent's
//!   `sale_count` is advanced under the same lock that computed the range.
//!
//! - **Purchase** (`purchase.rs`): the parent allocation of a resale, with
//!   the same `inventory = issue - sale` invariant as a listing.
//!
//! - **Ownership** (`ownership.rs`): reconciliation of the transfer log over
//!   the mint log for a token range.
//!
//! - **Wallet** (`wallet.rs`): the DID wallet reference whose JWT is
//!   refreshed independently of the wallet DID.

pub mod allocation;
pub mod listing;
pub mod ownership;
pub mod purchase;
pub mod wallet;

pub use allocation::{allocate_range, TokenRange, TokenRangeError};
pub use listing::{
    CredentialRecord, Listing, ListingDraft, ListingError, ListingPatch, ListingState, Seller,
};
pub use ownership::{
    latest_transfers, merge_ownership, minted_range, untransferred, MintRecord, OwnershipSource,
    TokenOwner, TransferRecord,
};
pub use purchase::{PurchaseDraft, PurchaseRecord, ResaleTerms};
pub use wallet::IdentityWalletRef;
