//! # nftm-saga — Tokenization and Credential Issuance Saga
//!
//! Drives a listing from creation to a minted, credentialed, on-sale
//! edition across three parties that do not share a transaction: the local
//! database, the minting service and the DID/VC provider.
//!
//! ## Components
//!
//! - [`store`]: persistence traits with Postgres and in-memory backends.
//!   Every read-modify-write runs under a row lock.
//! - [`ListingStateMachine`]: create, resell, purchase, state changes and
//!   soft delete.
//! - [`MintCoordinator`]: the mint outbox, its dispatch and reconciliation
//!   passes, the consistency poll and token ownership resolution.
//! - [`CredentialClient`]: DID/VC operations with one JWT refresh per call.
//! - [`SagaOrchestrator`]: the direct listing, combined sell flow and
//!   credential completion entry points.
//!
//! ## Consistency Model
//!
//! A listing and its mint outbox entry commit together. The mint is then
//! dispatched outside any transaction; the minter's records are bound to the
//! listing later, either by a caller polling [`MintCoordinator::await_consistency`]
//! or by the worker's reconciliation pass.

pub mod config;
pub mod credential;
pub mod error;
pub mod listing;
pub mod mint;
pub mod orchestrator;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConsistencyPolicy, OutboxPolicy, SagaConfig};
pub use credential::CredentialClient;
pub use error::{MarketError, SagaStep, StoreError};
pub use listing::{CreateListing, ListingStateMachine};
pub use mint::{DispatchReport, MintCoordinator};
pub use orchestrator::{CredentialOutcome, SagaOrchestrator, SellRequest};
pub use store::{init_pool, MarketStore, MemoryStore, PgStore};
