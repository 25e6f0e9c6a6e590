//! Scripted collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use nftm_core::{ContractId, TokenId};
use nftm_gateway::{
    DidOperation, DidTransport, GatewayError, MintRequest, MintTransport, ProviderFailure,
    ProviderReply,
};

use crate::store::MemoryStore;

/// A DID provider that replays scripted replies per operation and falls
/// back to a plausible success reply.
#[derive(Default)]
pub(crate) struct ScriptedDid {
    scripts: Mutex<HashMap<DidOperation, VecDeque<ProviderReply>>>,
    calls: Mutex<Vec<(DidOperation, Option<String>)>>,
    connects: AtomicUsize,
}

impl ScriptedDid {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_failure(&self, operation: DidOperation, reason: &str, message: Option<&str>) {
        self.scripts
            .lock()
            .entry(operation)
            .or_default()
            .push_back(ProviderReply::Failure(ProviderFailure {
                result: "Fail".into(),
                failure_reason: reason.into(),
                failure_message: message.map(String::from),
            }));
    }

    pub(crate) fn calls(&self) -> Vec<(DidOperation, Option<String>)> {
        self.calls.lock().clone()
    }

    pub(crate) fn count(&self, operation: DidOperation) -> usize {
        self.calls.lock().iter().filter(|(op, _)| *op == operation).count()
    }

    fn default_reply(&self, operation: DidOperation) -> ProviderReply {
        let body = match operation {
            DidOperation::ConnectUser => {
                let n = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
                json!({"result": "Success", "jwt": format!("jwt-{n}")})
            }
            DidOperation::CreateWallet => json!({"result": "Success", "did": "did:wallet:1"}),
            DidOperation::GenerateCredentialDid => json!({"result": "Success", "did": "did:cred:1"}),
            DidOperation::IssueCredential => json!({
                "result": "Success",
                "vcId": "vc-1",
                "issuerName": "Market Authority",
                "typeName": "NftOwnershipCredential"
            }),
            DidOperation::RegisterCredential => json!({"result": "Success", "vcId": "vc-1"}),
            DidOperation::FetchMeta => json!({
                "result": "Success",
                "vcType": "NftOwnershipCredential",
                "issuerName": "Market Authority"
            }),
            DidOperation::FetchDetail => json!({
                "result": "Success",
                "vcId": "vc-1",
                "typeName": "NftOwnershipCredential"
            }),
        };
        ProviderReply::Success(body)
    }
}

#[async_trait]
impl DidTransport for ScriptedDid {
    async fn call(
        &self,
        operation: DidOperation,
        jwt: Option<&str>,
        _payload: serde_json::Value,
    ) -> Result<ProviderReply, GatewayError> {
        self.calls.lock().push((operation, jwt.map(String::from)));
        let scripted = self
            .scripts
            .lock()
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        Ok(scripted.unwrap_or_else(|| self.default_reply(operation)))
    }
}

/// A minter that records requests and can be told to refuse them.
#[derive(Default)]
pub(crate) struct RecordingMinter {
    requests: Mutex<Vec<MintRequest>>,
    refuse: AtomicBool,
}

impl RecordingMinter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn requests(&self) -> Vec<MintRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl MintTransport for RecordingMinter {
    async fn mint(&self, request: &MintRequest) -> Result<(), GatewayError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(GatewayError::ApiError {
                endpoint: "POST /mint".into(),
                status: 503,
                body: "minter unavailable".into(),
            });
        }
        self.requests.lock().push(request.clone());
        Ok(())
    }
}

/// A minter that writes the edition straight into a [`MemoryStore`], the way
/// the real minting service eventually does.
pub(crate) struct LedgerMinter {
    store: MemoryStore,
    next_token: AtomicI64,
}

impl LedgerMinter {
    pub(crate) fn new(store: MemoryStore, first_token: i64) -> Self {
        Self {
            store,
            next_token: AtomicI64::new(first_token),
        }
    }
}

#[async_trait]
impl MintTransport for LedgerMinter {
    async fn mint(&self, request: &MintRequest) -> Result<(), GatewayError> {
        let first = self.next_token.fetch_add(request.issue_count, Ordering::SeqCst);
        self.store.record_edition(
            request.market_listing_id,
            ContractId(1),
            TokenId(first),
            request.issue_count,
            &request.issued_to_address,
        );
        Ok(())
    }
}
