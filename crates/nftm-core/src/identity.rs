//! # Identifier Newtypes
//!
//! Surrogate keys are numeric (assigned by the relational store), so every
//! identifier wraps an `i64`. The wrappers exist to stop cross-namespace
//! confusion: a resale call carries a purchase id, a listing id and a
//! contract id at once.

use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Access the raw key.
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

numeric_id!(
    /// A market listing (one sellable unit).
    ListingId,
    "listing"
);
numeric_id!(
    /// A purchase record; the parent allocation of a resale.
    PurchaseId,
    "purchase"
);
numeric_id!(
    /// The contract binding a product and an asset to its owner.
    ContractId,
    "contract"
);
numeric_id!(
    /// A catalog product.
    ProductId,
    "product"
);
numeric_id!(
    /// An uploaded digital asset.
    AssetId,
    "asset"
);
numeric_id!(
    /// A local user or enterprise account.
    UserId,
    "user"
);

/// An NFT token id on the ledger.
///
/// Ordered numerically; ownership reconciliation sorts by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub i64);

impl TokenId {
    /// Access the raw token number.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TokenId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
