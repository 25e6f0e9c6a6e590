//! # DID/VC Credential Client
//!
//! Wraps a [`DidTransport`] with the session protocol every provider
//! operation follows:
//!
//! 1. Call with the user's stored JWT, connecting first if there is none.
//! 2. A `Success` reply is decoded into the operation's payload type.
//! 3. A failure reply is classified:
//!    - `NoRegistration` / `InvalidBioAuthentication` fail immediately with
//!      a fixed message.
//!    - An expired JWT triggers one reconnect (the fresh JWT is persisted)
//!      and one more call. A second expiry is `RetryExhausted`.
//!    - Anything else fails with the provider's own message.
//!
//! The client never persists a wallet DID. Callers bind it once, when the
//! wallet is created.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use nftm_core::UserId;
use nftm_gateway::did::{
    decode, ConnectUserReply, ConnectUserRequest, CreateWalletRequest, CredentialDetail,
    CredentialDetailRequest, CredentialDidRequest, CredentialMeta, CredentialMetaRequest, DidReply,
    IssueCredentialRequest, IssuedCredential, RegisterCredentialRequest, RegisteredCredential,
};
use nftm_gateway::{DidOperation, DidTransport, ProviderFailure, ProviderReply};

use crate::error::MarketError;
use crate::store::{IdentityStore, UserRecord};

/// Provider reason prefix for an expired JWT.
pub const EXPIRED_JWT_EXCEPTION: &str = "io.jsonwebtoken.ExpiredJwtException";

/// Literal provider reason for an expired JWT.
pub const TOKEN_EXPIRED: &str = "token expired";

const NO_REGISTRATION: &str = "NoRegistration";
const INVALID_BIO_AUTHENTICATION: &str = "InvalidBioAuthentication";

/// How a provider failure reply is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FailureClass {
    /// Known non-retryable reason with a fixed message.
    Rejected { reason: String, message: &'static str },
    /// The session JWT has expired.
    Expired,
    /// Anything else.
    Other(String),
}

fn classify(failure: &ProviderFailure) -> FailureClass {
    let reason = failure.failure_reason.as_str();
    match reason {
        NO_REGISTRATION => FailureClass::Rejected {
            reason: reason.to_string(),
            message: "This account is not registered with the identity provider.",
        },
        INVALID_BIO_AUTHENTICATION => FailureClass::Rejected {
            reason: reason.to_string(),
            message: "Biometric authentication failed. Please authenticate again.",
        },
        r if r.starts_with(EXPIRED_JWT_EXCEPTION) || r == TOKEN_EXPIRED => FailureClass::Expired,
        _ => FailureClass::Other(failure.describe()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Reauthenticated,
}

/// Session-aware client for the DID/VC provider.
#[derive(Clone)]
pub struct CredentialClient {
    transport: Arc<dyn DidTransport>,
    identities: Arc<dyn IdentityStore>,
}

impl std::fmt::Debug for CredentialClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialClient").finish_non_exhaustive()
    }
}

impl CredentialClient {
    pub fn new(transport: Arc<dyn DidTransport>, identities: Arc<dyn IdentityStore>) -> Self {
        Self {
            transport,
            identities,
        }
    }

    // ── Session ─────────────────────────────────────────────────────

    /// Authenticate the user and persist the returned JWT.
    #[tracing::instrument(skip_all, fields(user_id = %user.id))]
    pub async fn connect_user(&self, user: &UserRecord) -> Result<String, MarketError> {
        let operation = DidOperation::ConnectUser;
        let payload = to_payload(&ConnectUserRequest {
            email: user.email.clone(),
            nickname: user.nickname.clone(),
        })?;
        let reply = self.transport.call(operation, None, payload).await?;
        let body = match reply {
            ProviderReply::Success(body) => body,
            ProviderReply::Failure(failure) => {
                return Err(match classify(&failure) {
                    FailureClass::Rejected { reason, message } => MarketError::CredentialRejected {
                        reason,
                        message: message.to_string(),
                    },
                    FailureClass::Expired | FailureClass::Other(_) => MarketError::ExternalService {
                        status: None,
                        message: failure.describe(),
                    },
                });
            }
        };
        let ConnectUserReply { jwt } = decode(operation, body)?;
        self.identities.save_jwt(user.id, Some(jwt.clone())).await?;
        tracing::debug!("DID session established");
        Ok(jwt)
    }

    /// Forced logout: clear the JWT, keep the wallet DID.
    pub async fn logout(&self, user_id: UserId) -> Result<(), MarketError> {
        self.identities.save_jwt(user_id, None).await?;
        tracing::info!(%user_id, "DID session cleared");
        Ok(())
    }

    async fn session(&self, user: &UserRecord) -> Result<String, MarketError> {
        let stored = self
            .identities
            .wallet(user.id)
            .await?
            .and_then(|w| w.jwt);
        match stored {
            Some(jwt) => Ok(jwt),
            None => self.connect_user(user).await,
        }
    }

    /// Run one provider operation under the user's session.
    async fn call<Req, Resp>(
        &self,
        user: &UserRecord,
        operation: DidOperation,
        request: &Req,
    ) -> Result<Resp, MarketError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = to_payload(request)?;
        let mut jwt = self.session(user).await?;
        let mut attempt = Attempt::First;
        loop {
            let reply = self
                .transport
                .call(operation, Some(jwt.as_str()), payload.clone())
                .await?;
            let failure = match reply {
                ProviderReply::Success(body) => return Ok(decode(operation, body)?),
                ProviderReply::Failure(failure) => failure,
            };
            match (classify(&failure), attempt) {
                (FailureClass::Rejected { reason, message }, _) => {
                    tracing::warn!(%operation, %reason, "provider rejected credential operation");
                    return Err(MarketError::CredentialRejected {
                        reason,
                        message: message.to_string(),
                    });
                }
                (FailureClass::Expired, Attempt::First) => {
                    tracing::info!(%operation, user_id = %user.id, "JWT expired; reauthenticating");
                    jwt = self.connect_user(user).await?;
                    attempt = Attempt::Reauthenticated;
                }
                (FailureClass::Expired, Attempt::Reauthenticated) => {
                    tracing::warn!(%operation, user_id = %user.id, "JWT expired after reauthentication");
                    return Err(MarketError::RetryExhausted {
                        operation: operation.to_string(),
                    });
                }
                (FailureClass::Other(message), _) => {
                    return Err(MarketError::ExternalService {
                        status: None,
                        message,
                    });
                }
            }
        }
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Create a DID wallet. Returns the wallet DID without persisting it.
    pub async fn create_wallet(&self, user: &UserRecord) -> Result<String, MarketError> {
        let request = CreateWalletRequest {
            nickname: user.nickname.clone(),
        };
        let DidReply { did } = self.call(user, DidOperation::CreateWallet, &request).await?;
        Ok(did)
    }

    /// Derive a credential DID from the wallet DID.
    pub async fn generate_credential_did(
        &self,
        user: &UserRecord,
        wallet_did: &str,
    ) -> Result<String, MarketError> {
        let request = CredentialDidRequest {
            wallet_did: wallet_did.to_string(),
        };
        let DidReply { did } = self
            .call(user, DidOperation::GenerateCredentialDid, &request)
            .await?;
        Ok(did)
    }

    pub async fn issue_credential(
        &self,
        user: &UserRecord,
        request: &IssueCredentialRequest,
    ) -> Result<IssuedCredential, MarketError> {
        self.call(user, DidOperation::IssueCredential, request).await
    }

    pub async fn register_credential(
        &self,
        user: &UserRecord,
        credential_did: &str,
        vc_id: &str,
    ) -> Result<RegisteredCredential, MarketError> {
        let request = RegisterCredentialRequest {
            credential_did: credential_did.to_string(),
            vc_id: vc_id.to_string(),
        };
        self.call(user, DidOperation::RegisterCredential, &request).await
    }

    pub async fn fetch_meta(&self, user: &UserRecord, vc_type: &str) -> Result<CredentialMeta, MarketError> {
        let request = CredentialMetaRequest {
            vc_type: vc_type.to_string(),
        };
        self.call(user, DidOperation::FetchMeta, &request).await
    }

    pub async fn fetch_detail(&self, user: &UserRecord, vc_id: &str) -> Result<CredentialDetail, MarketError> {
        let request = CredentialDetailRequest {
            vc_id: vc_id.to_string(),
        };
        self.call(user, DidOperation::FetchDetail, &request).await
    }
}

fn to_payload<T: Serialize>(request: &T) -> Result<serde_json::Value, MarketError> {
    serde_json::to_value(request).map_err(|e| MarketError::Invariant(format!("unserializable provider request: {e}")))
}
