//! Typed client for the DID/VC provider.
//!
//! Every operation is a `POST {did_url}/api/v1/operations` carrying
//! `{operation, payload}`. The user's JWT travels as a bearer token; the
//! market's service key in `X-Service-Key`.
//!
//! | Operation | Purpose |
//! |-----------|---------|
//! | `UserConnectingAuthentication` | Authenticate a user, returns a fresh JWT |
//! | `AvatarVirtualWalletCreate` | Create the user's wallet, returns its DID |
//! | `AvatarCredentialDidGen` | Generate a DID for a new credential |
//! | `AvatarCredentialIssue` | Issue a VC against a credential DID |
//! | `AvatarCredentialRegister` | Register an issued VC |
//! | `AvatarCredentialMeta` | Credential type metadata |
//! | `AvatarCredentialDetail` | Detail of an issued VC |
//!
//! Replies are `{"result": "Success", ...payload}` on success and
//! `{"result": <other>, "failureReason": ..., "failureMessage": ...}` on
//! failure. A failure reply is not a transport error: it is returned as
//! [`ProviderReply::Failure`] for the caller to classify.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::retry::Delivery;

const OPERATIONS_PATH: &str = "api/v1/operations";

/// Header carrying the market's service key.
pub const SERVICE_KEY_HEADER: &str = "x-service-key";

/// The `result` value of a successful reply.
pub const SUCCESS_RESULT: &str = "Success";

// -- Operations ---------------------------------------------------------------

/// Operations exposed by the DID/VC provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DidOperation {
    #[serde(rename = "UserConnectingAuthentication")]
    ConnectUser,
    #[serde(rename = "AvatarVirtualWalletCreate")]
    CreateWallet,
    #[serde(rename = "AvatarCredentialDidGen")]
    GenerateCredentialDid,
    #[serde(rename = "AvatarCredentialIssue")]
    IssueCredential,
    #[serde(rename = "AvatarCredentialRegister")]
    RegisterCredential,
    #[serde(rename = "AvatarCredentialMeta")]
    FetchMeta,
    #[serde(rename = "AvatarCredentialDetail")]
    FetchDetail,
}

impl DidOperation {
    /// Wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectUser => "UserConnectingAuthentication",
            Self::CreateWallet => "AvatarVirtualWalletCreate",
            Self::GenerateCredentialDid => "AvatarCredentialDidGen",
            Self::IssueCredential => "AvatarCredentialIssue",
            Self::RegisterCredential => "AvatarCredentialRegister",
            Self::FetchMeta => "AvatarCredentialMeta",
            Self::FetchDetail => "AvatarCredentialDetail",
        }
    }

    /// Whether the provider changes state when it handles the operation.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, Self::ConnectUser | Self::FetchMeta | Self::FetchDetail)
    }

    pub(crate) fn delivery(&self) -> Delivery {
        if self.is_idempotent() {
            Delivery::Replayable
        } else {
            Delivery::AtMostOnce
        }
    }
}

impl std::fmt::Display for DidOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- Replies ------------------------------------------------------------------

/// A non-success reply from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFailure {
    pub result: String,
    #[serde(default)]
    pub failure_reason: String,
    #[serde(default)]
    pub failure_message: Option<String>,
}

impl ProviderFailure {
    /// The provider's message with the secondary detail appended, if any.
    pub fn describe(&self) -> String {
        match self.failure_message.as_deref() {
            Some(detail) if !detail.is_empty() => format!("{} {}", self.failure_reason, detail),
            _ => self.failure_reason.clone(),
        }
    }
}

/// A provider reply, classified by its `result` field.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderReply {
    Success(serde_json::Value),
    Failure(ProviderFailure),
}

impl ProviderReply {
    /// Classify a decoded reply body.
    pub fn from_body(endpoint: &str, body: serde_json::Value) -> Result<Self, GatewayError> {
        match body.get("result").and_then(|r| r.as_str()) {
            Some(SUCCESS_RESULT) => Ok(Self::Success(body)),
            Some(_) => serde_json::from_value(body)
                .map(Self::Failure)
                .map_err(|e| GatewayError::Deserialization {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                }),
            None => Err(GatewayError::Deserialization {
                endpoint: endpoint.to_string(),
                reason: "reply has no `result` field".to_string(),
            }),
        }
    }
}

/// Decode a success payload into its typed shape.
pub fn decode<T: DeserializeOwned>(
    operation: DidOperation,
    payload: serde_json::Value,
) -> Result<T, GatewayError> {
    serde_json::from_value(payload).map_err(|e| GatewayError::Deserialization {
        endpoint: operation.to_string(),
        reason: e.to_string(),
    })
}

// -- Payloads -----------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectUserRequest {
    pub email: String,
    pub nickname: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectUserReply {
    pub jwt: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletRequest {
    pub nickname: String,
}

/// Reply of wallet creation and credential-DID generation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidReply {
    pub did: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDidRequest {
    pub wallet_did: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCredentialRequest {
    pub credential_did: String,
    pub holder_did: String,
    pub vc_type: String,
    pub claims: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCredential {
    pub vc_id: String,
    pub issuer_name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCredentialRequest {
    pub credential_did: String,
    pub vc_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredCredential {
    pub vc_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialMetaRequest {
    pub vc_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialMeta {
    pub vc_type: String,
    #[serde(default)]
    pub issuer_name: Option<String>,
    #[serde(default)]
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDetailRequest {
    pub vc_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDetail {
    pub vc_id: String,
    #[serde(default)]
    pub issuer_name: Option<String>,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub issued_at: Option<String>,
    #[serde(default)]
    pub claims: serde_json::Value,
}

// -- Transport ----------------------------------------------------------------

/// One round trip to the DID provider.
#[async_trait]
pub trait DidTransport: Send + Sync {
    async fn call(
        &self,
        operation: DidOperation,
        jwt: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<ProviderReply, GatewayError>;
}

#[derive(Serialize)]
struct OperationEnvelope<'a> {
    operation: DidOperation,
    payload: &'a serde_json::Value,
}

/// HTTP client for the DID/VC provider.
#[derive(Debug, Clone)]
pub struct DidProviderClient {
    http: reqwest::Client,
    base_url: url::Url,
}

impl DidProviderClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let mut key = reqwest::header::HeaderValue::from_str(config.service_key.as_str())
            .map_err(|_| GatewayError::Config(crate::config::ConfigError::MissingServiceKey))?;
        key.set_sensitive(true);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(SERVICE_KEY_HEADER, key);
                headers
            })
            .build()
            .map_err(|e| GatewayError::Http {
                endpoint: "client_init".into(),
                source: e,
            })?;

        Ok(Self {
            http,
            base_url: config.did_url.clone(),
        })
    }
}

#[async_trait]
impl DidTransport for DidProviderClient {
    async fn call(
        &self,
        operation: DidOperation,
        jwt: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<ProviderReply, GatewayError> {
        let endpoint = format!("POST /{OPERATIONS_PATH} {operation}");
        let url = format!("{}{}", self.base_url, OPERATIONS_PATH);
        let envelope = OperationEnvelope {
            operation,
            payload: &payload,
        };

        tracing::debug!(%operation, authenticated = jwt.is_some(), "calling DID provider");

        let resp = crate::retry::send(&endpoint, operation.delivery(), || {
            let mut req = self.http.post(&url).json(&envelope);
            if let Some(token) = jwt {
                req = req.bearer_auth(token);
            }
            req.send()
        })
        .await
        .map_err(|e| GatewayError::Http {
            endpoint: endpoint.clone(),
            source: e,
        })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| GatewayError::Http {
            endpoint: endpoint.clone(),
            source: e,
        })?;

        if !status.is_success() {
            // Some deployments report auth failures (expired JWT) with a 4xx
            // status and the usual failure body.
            if status.is_client_error() {
                if let Ok(failure) = serde_json::from_str::<ProviderFailure>(&body) {
                    if !failure.failure_reason.is_empty() {
                        return Ok(ProviderReply::Failure(failure));
                    }
                }
            }
            return Err(GatewayError::ApiError {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| GatewayError::Deserialization {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;
        ProviderReply::from_body(&endpoint, value)
    }
}
