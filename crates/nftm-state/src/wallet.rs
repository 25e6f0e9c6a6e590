//! DID wallet reference held per local user.

use serde::{Deserialize, Serialize};

use nftm_core::UserId;

/// A user's handle on the DID provider.
///
/// The JWT is short-lived and is replaced on every authentication or
/// cleared on logout; the wallet DID is bound once and survives both.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityWalletRef {
    pub owner: UserId,
    pub jwt: Option<String>,
    pub wallet_did: Option<String>,
    pub vc_type: Option<String>,
}

impl IdentityWalletRef {
    pub fn new(owner: UserId) -> Self {
        Self {
            owner,
            jwt: None,
            wallet_did: None,
            vc_type: None,
        }
    }

    pub fn set_jwt(&mut self, jwt: impl Into<String>) {
        self.jwt = Some(jwt.into());
    }

    pub fn clear_jwt(&mut self) {
        self.jwt = None;
    }

    /// Bind the wallet DID. Returns `false` if one was already bound; the
    /// existing DID is kept.
    pub fn bind_wallet_did(&mut self, did: impl Into<String>) -> bool {
        if self.wallet_did.is_some() {
            return false;
        }
        self.wallet_did = Some(did.into());
        true
    }

    pub fn has_session(&self) -> bool {
        self.jwt.is_some()
    }
}

impl std::fmt::Debug for IdentityWalletRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityWalletRef")
            .field("owner", &self.owner)
            .field("jwt", &self.jwt.as_ref().map(|_| "[REDACTED]"))
            .field("wallet_did", &self.wallet_did)
            .field("vc_type", &self.vc_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clearing_jwt_keeps_wallet_did() {
        let mut w = IdentityWalletRef::new(UserId(1));
        w.set_jwt("jwt-1");
        assert!(w.bind_wallet_did("did:avatar:1"));
        w.clear_jwt();
        assert!(!w.has_session());
        assert_eq!(w.wallet_did.as_deref(), Some("did:avatar:1"));
    }

    #[test]
    fn wallet_did_binds_once() {
        let mut w = IdentityWalletRef::new(UserId(1));
        assert!(w.bind_wallet_did("did:a"));
        assert!(!w.bind_wallet_did("did:b"));
        assert_eq!(w.wallet_did.as_deref(), Some("did:a"));
    }

    #[test]
    fn debug_redacts_jwt() {
        let mut w = IdentityWalletRef::new(UserId(1));
        w.set_jwt("secret-token");
        let out = format!("{w:?}");
        assert!(!out.contains("secret-token"));
        assert!(out.contains("REDACTED"));
    }
}
