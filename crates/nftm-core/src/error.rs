//! # Validation Errors
//!
//! Errors raised by validated constructors in this crate. State machine and
//! persistence errors live in their own crates and wrap these where needed.

use thiserror::Error;

/// Rejected input for a validated primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// An address was empty or contained whitespace.
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    /// A price was negative.
    #[error("price must not be negative, got {0}")]
    NegativePrice(i64),

    /// An edition size or quantity was zero or negative.
    #[error("{field} must be positive, got {value}")]
    NonPositiveCount {
        /// The offending field.
        field: &'static str,
        /// The rejected value.
        value: i64,
    },

    /// A required text field was empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),
}
