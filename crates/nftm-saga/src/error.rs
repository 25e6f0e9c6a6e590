//! # Saga Error Types
//!
//! [`StoreError`] is what persistence returns; [`MarketError`] is what every
//! saga operation returns. Domain rejections raised under a row lock travel
//! through `StoreError::Rejected` and surface unchanged as the matching
//! `MarketError` variant.

use nftm_core::{AssetId, ContractId, ListingId, ProductId, UserId, ValidationError};
use nftm_gateway::GatewayError;
use nftm_state::{ListingError, ListingState};
use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The domain mutation applied under the row lock refused the change.
    /// Nothing was written.
    #[error(transparent)]
    Rejected(#[from] ListingError),

    /// Database driver error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A persisted row failed to decode into its domain type.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// A saga step that committed durably before a later step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStep {
    UserEnsured(UserId),
    WalletEnsured(UserId),
    ProductCreated(ProductId),
    AssetCreated(AssetId),
    ContractCreated(ContractId),
    ListingCreated(ListingId),
}

impl SagaStep {
    /// Whether re-running the saga would repeat this step's side effect.
    ///
    /// Ensuring a user or wallet is idempotent; catalog rows and listings are
    /// created afresh on every run.
    pub fn is_durable_side_effect(&self) -> bool {
        !matches!(self, Self::UserEnsured(_) | Self::WalletEnsured(_))
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserEnsured(id) => write!(f, "user ensured ({id})"),
            Self::WalletEnsured(id) => write!(f, "wallet ensured ({id})"),
            Self::ProductCreated(id) => write!(f, "product created ({id})"),
            Self::AssetCreated(id) => write!(f, "asset created ({id})"),
            Self::ContractCreated(id) => write!(f, "contract created ({id})"),
            Self::ListingCreated(id) => write!(f, "listing created ({id})"),
        }
    }
}

/// Errors surfaced by saga operations.
#[derive(Error, Debug)]
pub enum MarketError {
    /// Referenced listing, purchase, contract or user does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The listing is in a terminal or conflicting state.
    #[error("listing is already {0}")]
    AlreadyInState(String),

    /// The caller does not own the record.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The requested state change is not allowed from the current state.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ListingState,
        to: ListingState,
    },

    /// Not enough unsold tokens remain.
    #[error("insufficient inventory: requested {requested}, available {available}")]
    InsufficientInventory { requested: i64, available: i64 },

    /// Input failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// The record is not in a state that allows the operation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The DID provider refused the call for a known, non-retryable reason.
    #[error("{message}")]
    CredentialRejected { reason: String, message: String },

    /// An external service failed outside the retry path.
    #[error("external service error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    ExternalService {
        status: Option<u16>,
        message: String,
    },

    /// The JWT expired again right after reauthentication.
    #[error("retry exhausted for {operation}")]
    RetryExhausted { operation: String },

    /// The asynchronous mint result did not become visible in time.
    #[error("listing {listing_id} not minted after {attempts} polls")]
    ConsistencyTimeout { listing_id: ListingId, attempts: u32 },

    /// A combined sell-flow failed after some steps had committed.
    #[error("sell flow failed after {} committed step(s): {source}", .completed.len())]
    PartialSagaFailure {
        completed: Vec<SagaStep>,
        source: Box<MarketError>,
    },

    /// A structural invariant would have been broken.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Persistence failure.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl MarketError {
    /// Whether the failure is the caller's fault (4xx-equivalent).
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::NotFound(_)
            | Self::AlreadyInState(_)
            | Self::Unauthorized(_)
            | Self::InvalidTransition { .. }
            | Self::InsufficientInventory { .. }
            | Self::Validation(_)
            | Self::Conflict(_)
            | Self::CredentialRejected { .. } => true,
            Self::PartialSagaFailure { source, .. } => source.is_client_error(),
            Self::ExternalService { .. }
            | Self::RetryExhausted { .. }
            | Self::ConsistencyTimeout { .. }
            | Self::Invariant(_)
            | Self::Store(_) => false,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyInState(_) => "ALREADY_IN_STATE",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::InsufficientInventory { .. } => "INSUFFICIENT_INVENTORY",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::CredentialRejected { .. } => "CREDENTIAL_REJECTED",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Self::ConsistencyTimeout { .. } => "CONSISTENCY_TIMEOUT",
            Self::PartialSagaFailure { .. } => "PARTIAL_SAGA_FAILURE",
            Self::Invariant(_) => "INVARIANT_VIOLATION",
            Self::Store(_) => "STORE_ERROR",
        }
    }
}

impl From<ListingError> for MarketError {
    fn from(err: ListingError) -> Self {
        match err {
            ListingError::AlreadyInState { state } => Self::AlreadyInState(state.description().to_string()),
            ListingError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
            ListingError::Unauthorized { caller } => {
                Self::Unauthorized(format!("{caller} does not own this record"))
            }
            ListingError::InsufficientInventory {
                requested,
                available,
            } => Self::InsufficientInventory {
                requested,
                available,
            },
            ListingError::AlreadyCredentialed { vc_id } => Self::AlreadyInState(format!("credentialed ({vc_id})")),
            e @ (ListingError::NotMinted | ListingError::Inactive) => Self::Conflict(e.to_string()),
            e @ (ListingError::Validation(_) | ListingError::TokenRange(_)) => Self::Validation(e.to_string()),
            ListingError::InvariantViolation(msg) => Self::Invariant(msg),
        }
    }
}

impl From<StoreError> for MarketError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Rejected(e) => e.into(),
            other => Self::Store(other),
        }
    }
}

impl From<ValidationError> for MarketError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<GatewayError> for MarketError {
    fn from(err: GatewayError) -> Self {
        Self::ExternalService {
            status: err.status(),
            message: err.to_string(),
        }
    }
}
