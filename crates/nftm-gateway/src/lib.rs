//! # nftm-gateway -- Typed clients for the market's external services
//!
//! - **DID/VC provider** (`did.rs`): one operation endpoint keyed by
//!   operation name, authenticated with the user's short-lived JWT.
//! - **Minting service** (`minter.rs`): fire-and-forget mint hand-off.
//!
//! Both clients sit behind async traits ([`DidTransport`], [`MintTransport`])
//! so the saga can be driven against scripted fakes. This layer knows
//! nothing about JWT refresh: a provider failure reply is data, not an
//! error, and is classified by the saga's credential client.

pub mod config;
pub mod did;
pub mod error;
pub mod minter;
pub(crate) mod retry;

pub use config::{ConfigError, GatewayConfig};
pub use did::{DidOperation, DidProviderClient, DidTransport, ProviderFailure, ProviderReply};
pub use error::GatewayError;
pub use minter::{MintClient, MintRequest, MintTransport};
