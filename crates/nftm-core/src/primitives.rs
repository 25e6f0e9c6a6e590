//! # Validated Primitives
//!
//! `Address` is an on-ledger account address (or wallet DID) used as the
//! owner of listings and tokens. `Price` is an amount in minor units; floats
//! are never used for amounts.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A ledger address or wallet DID.
///
/// Compared byte-for-byte: ownership checks on listings are exact matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Create a validated address.
    ///
    /// Rejects empty strings and strings containing whitespace.
    pub fn new(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        if raw.is_empty() || raw.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidAddress(raw));
        }
        Ok(Self(raw))
    }

    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Address {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A listing price in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Price(i64);

impl Price {
    /// Create a validated price. Zero is allowed (free drops).
    pub fn new(minor_units: i64) -> Result<Self, ValidationError> {
        if minor_units < 0 {
            return Err(ValidationError::NegativePrice(minor_units));
        }
        Ok(Self(minor_units))
    }

    /// The amount in minor units.
    pub fn minor_units(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Price {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Price> for i64 {
    fn from(value: Price) -> Self {
        value.0
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_rejects_empty_and_whitespace() {
        assert!(Address::new("").is_err());
        assert!(Address::new("0xabc def").is_err());
        assert_eq!(Address::new("0xabc").unwrap().as_str(), "0xabc");
    }

    #[test]
    fn address_deserialization_validates() {
        let ok: Address = serde_json::from_str("\"did:nftm:alice\"").unwrap();
        assert_eq!(ok.as_str(), "did:nftm:alice");
        assert!(serde_json::from_str::<Address>("\"\"").is_err());
    }

    #[test]
    fn price_rejects_negative() {
        assert_eq!(Price::new(-1), Err(ValidationError::NegativePrice(-1)));
        assert_eq!(Price::new(0).unwrap().minor_units(), 0);
        assert!(serde_json::from_str::<Price>("-5").is_err());
    }
}
