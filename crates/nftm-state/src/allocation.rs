//! # Token Range Allocation
//!
//! A listing's edition occupies the inclusive range `[from, to]` with
//! `to - from + 1 == issue_count`. Sub-allocations (a purchase out of a
//! listing, a resale out of a purchase) are carved from the parent in sale
//! order:
//!
//! ```text
//! new_from = parent_from + parent_sale_count
//! new_to   = new_from + issue_count - 1
//! ```
//!
//! Two allocations against the same parent are disjoint only if the parent's
//! `sale_count` advances atomically with each allocation. Callers must hold
//! the parent's row lock across compute-and-update.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use nftm_core::TokenId;

/// Errors computing a token range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenRangeError {
    /// The requested edition size was zero or negative.
    #[error("issue count must be positive, got {0}")]
    NonPositiveCount(i64),

    /// The parent's sale count was negative (corrupt parent row).
    #[error("parent sale count must not be negative, got {0}")]
    NegativeSaleCount(i64),

    /// Range end precedes range start.
    #[error("token range is inverted: {from} > {to}")]
    Inverted {
        /// Range start.
        from: TokenId,
        /// Range end.
        to: TokenId,
    },

    /// Token arithmetic overflowed `i64`.
    #[error("token id arithmetic overflowed")]
    Overflow,
}

/// An inclusive, non-empty range of token ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenRange {
    from: TokenId,
    to: TokenId,
}

impl TokenRange {
    /// Build a range, rejecting `from > to`.
    pub fn new(from: TokenId, to: TokenId) -> Result<Self, TokenRangeError> {
        if from > to {
            return Err(TokenRangeError::Inverted { from, to });
        }
        Ok(Self { from, to })
    }

    /// First token id.
    pub fn from(&self) -> TokenId {
        self.from
    }

    /// Last token id (inclusive).
    pub fn to(&self) -> TokenId {
        self.to
    }

    /// Number of tokens in the range. Always at least 1.
    pub fn len(&self) -> i64 {
        self.to.get() - self.from.get() + 1
    }

    /// Ranges are never empty; provided for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `token` falls inside this range.
    pub fn contains(&self, token: TokenId) -> bool {
        self.from <= token && token <= self.to
    }

    /// Whether `other` lies entirely within this range.
    pub fn covers(&self, other: &TokenRange) -> bool {
        self.contains(other.from) && self.contains(other.to)
    }

    /// Whether the two ranges share at least one token id.
    pub fn overlaps(&self, other: &TokenRange) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    /// Iterate the token ids in ascending order.
    pub fn tokens(&self) -> impl Iterator<Item = TokenId> {
        (self.from.get()..=self.to.get()).map(TokenId)
    }
}

impl std::fmt::Display for TokenRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from.get(), self.to.get())
    }
}

/// Compute the next contiguous range out of a parent allocation.
pub fn allocate_range(
    parent_from: TokenId,
    parent_sale_count: i64,
    issue_count: i64,
) -> Result<TokenRange, TokenRangeError> {
    if issue_count <= 0 {
        return Err(TokenRangeError::NonPositiveCount(issue_count));
    }
    if parent_sale_count < 0 {
        return Err(TokenRangeError::NegativeSaleCount(parent_sale_count));
    }
    let from = parent_from
        .get()
        .checked_add(parent_sale_count)
        .ok_or(TokenRangeError::Overflow)?;
    let to = from
        .checked_add(issue_count - 1)
        .ok_or(TokenRangeError::Overflow)?;
    TokenRange::new(TokenId(from), TokenId(to))
}
