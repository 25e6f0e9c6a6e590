//! # nftm-core — Foundational Types for the NFT Market Saga
//!
//! Every other crate in the workspace depends on `nftm-core`; it depends on
//! nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `ListingId`, `PurchaseId`,
//!    `ContractId`, `ProductId`, `AssetId`, `UserId`, `TokenId` are all
//!    distinct types. A listing id cannot be passed where a purchase id is
//!    expected, which matters because resale flows carry both.
//!
//! 2. **Validated primitives.** `Address` and `Price` reject bad input at
//!    construction, so the state machine never sees an empty seller address
//!    or a negative price.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `nftm-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod primitives;

pub use error::ValidationError;
pub use identity::{AssetId, ContractId, ListingId, ProductId, PurchaseId, TokenId, UserId};
pub use primitives::{Address, Price};
