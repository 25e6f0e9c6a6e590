//! # Saga Orchestrator
//!
//! Sequences the three entry points of the market:
//!
//! - [`SagaOrchestrator::create`]: a primary listing for an asset the seller
//!   already owns.
//! - [`SagaOrchestrator::create_all`]: the combined sell flow, from a bare
//!   external identity and asset metadata to a minted listing.
//! - [`SagaOrchestrator::create_nft_vc`]: credential issuance for a minted
//!   listing, or a mint re-trigger for one that is not minted yet.
//!
//! Nothing is compensated. When `create_all` fails after a catalog row or
//! the listing committed, the error is a [`MarketError::PartialSagaFailure`]
//! naming the committed steps so an operator can reconcile them.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use nftm_core::{Address, ListingId, Price, UserId};
use nftm_gateway::did::{CredentialDetail, CredentialMeta, IssueCredentialRequest};
use nftm_gateway::{DidTransport, MintTransport};
use nftm_state::{CredentialRecord, IdentityWalletRef, Listing, Seller};

use crate::config::SagaConfig;
use crate::credential::CredentialClient;
use crate::error::{MarketError, SagaStep};
use crate::listing::{CreateListing, ListingStateMachine};
use crate::mint::MintCoordinator;
use crate::store::{
    MarketStore, MintOrder, NewAsset, NewContract, NewProduct, NewUser, OutboxEntry, UserRecord,
};

/// Input of the combined sell flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellRequest {
    pub email: String,
    pub nickname: String,
    pub product_name: String,
    pub description: String,
    pub file_name: String,
    pub content_type: String,
    pub price: Price,
    pub issue_count: i64,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

/// Result of [`SagaOrchestrator::create_nft_vc`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialOutcome {
    /// The listing had no token range; its mint was queued again.
    MintRetriggered(OutboxEntry),
    /// The credential was issued and the listing is on sale.
    Issued(Listing),
}

/// Steps that committed so far in one saga run.
#[derive(Debug, Default)]
struct SagaLog {
    completed: Vec<SagaStep>,
}

impl SagaLog {
    fn push(&mut self, step: SagaStep) {
        tracing::debug!(%step, "saga step committed");
        self.completed.push(step);
    }

    fn fail(&self, err: impl Into<MarketError>) -> MarketError {
        let err = err.into();
        if !self.completed.iter().any(SagaStep::is_durable_side_effect) {
            return err;
        }
        tracing::error!(
            completed = ?self.completed,
            error = %err,
            "sell flow failed after committing steps; manual reconciliation required"
        );
        MarketError::PartialSagaFailure {
            completed: self.completed.clone(),
            source: Box::new(err),
        }
    }
}

/// Drives listing creation, minting and credential issuance end to end.
#[derive(Clone)]
pub struct SagaOrchestrator {
    store: Arc<dyn MarketStore>,
    listings: ListingStateMachine,
    mints: MintCoordinator,
    credentials: CredentialClient,
    config: SagaConfig,
}

impl std::fmt::Debug for SagaOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SagaOrchestrator {
    pub fn new<S>(
        store: Arc<S>,
        did: Arc<dyn DidTransport>,
        minter: Arc<dyn MintTransport>,
        config: SagaConfig,
    ) -> Self
    where
        S: MarketStore + 'static,
    {
        let market: Arc<dyn MarketStore> = store.clone();
        let mints = MintCoordinator::new(market.clone(), minter, config.outbox);
        let listings = ListingStateMachine::new(market.clone(), mints.clone());
        let credentials = CredentialClient::new(did, store);
        Self {
            store: market,
            listings,
            mints,
            credentials,
            config,
        }
    }

    pub fn listings(&self) -> &ListingStateMachine {
        &self.listings
    }

    pub fn mints(&self) -> &MintCoordinator {
        &self.mints
    }

    pub fn credentials(&self) -> &CredentialClient {
        &self.credentials
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    async fn user(&self, id: UserId) -> Result<UserRecord, MarketError> {
        self.store
            .user(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(id.to_string()))
    }

    // ── Direct listing ──────────────────────────────────────────────

    /// Create a primary listing and trigger its mint.
    pub async fn create(&self, request: CreateListing) -> Result<Listing, MarketError> {
        self.listings.create(request).await
    }

    // ── Combined sell flow ──────────────────────────────────────────

    /// Ensure the seller's account and DID wallet, register the catalog
    /// chain, create the listing and wait for its mint.
    #[tracing::instrument(skip_all, fields(email = %request.email))]
    pub async fn create_all(&self, request: SellRequest) -> Result<Listing, MarketError> {
        let mut log = SagaLog::default();

        let user = self
            .store
            .ensure_user(NewUser {
                email: request.email.clone(),
                nickname: request.nickname.clone(),
            })
            .await
            .map_err(|e| log.fail(e))?;
        log.push(SagaStep::UserEnsured(user.id));

        let wallet = self.ensure_wallet(&user).await.map_err(|e| log.fail(e))?;
        log.push(SagaStep::WalletEnsured(user.id));
        let address = seller_address(&user, &wallet).map_err(|e| log.fail(e))?;

        let product = self
            .store
            .create_product(NewProduct {
                owner: user.id,
                name: request.product_name,
                description: request.description,
            })
            .await
            .map_err(|e| log.fail(e))?;
        log.push(SagaStep::ProductCreated(product));

        let asset = self
            .store
            .create_asset(NewAsset {
                owner: user.id,
                product_id: product,
                file_name: request.file_name,
                content_type: request.content_type,
            })
            .await
            .map_err(|e| log.fail(e))?;
        log.push(SagaStep::AssetCreated(asset));

        let contract = self
            .store
            .create_contract(NewContract {
                owner: user.id,
                product_id: product,
                asset_id: asset,
            })
            .await
            .map_err(|e| log.fail(e))?;
        log.push(SagaStep::ContractCreated(contract.id));

        let listing = self
            .listings
            .create(CreateListing {
                source_contract_id: contract.id,
                seller: Seller {
                    user_id: user.id,
                    address,
                    name: user.nickname.clone(),
                },
                price: request.price,
                issue_count: request.issue_count,
                start_date: request.start_date,
                end_date: request.end_date,
            })
            .await
            .map_err(|e| log.fail(e))?;
        log.push(SagaStep::ListingCreated(listing.id));

        // The outbox worker finishes a listing that times out here.
        match self.mints.await_consistency(listing.id, self.config.consistency).await {
            Ok(minted) => {
                tracing::info!(listing_id = %minted.id, "sell flow complete");
                Ok(minted)
            }
            Err(err @ MarketError::ConsistencyTimeout { .. }) => Err(err),
            Err(err) => Err(log.fail(err)),
        }
    }

    /// Make sure the user has a live session and a wallet DID.
    async fn ensure_wallet(&self, user: &UserRecord) -> Result<IdentityWalletRef, MarketError> {
        let existing = self.store.wallet(user.id).await?;
        if let Some(wallet) = &existing {
            if wallet.has_session() && wallet.wallet_did.is_some() {
                return Ok(wallet.clone());
            }
        }
        if !existing.as_ref().is_some_and(IdentityWalletRef::has_session) {
            self.credentials.connect_user(user).await?;
        }
        if existing.as_ref().and_then(|w| w.wallet_did.as_ref()).is_none() {
            let did = self.credentials.create_wallet(user).await?;
            tracing::info!(user_id = %user.id, "DID wallet created");
            return Ok(self.store.bind_wallet_did(user.id, did).await?);
        }
        self.store
            .wallet(user.id)
            .await?
            .ok_or_else(|| MarketError::Invariant(format!("wallet for {} vanished", user.id)))
    }

    // ── Credential completion ───────────────────────────────────────

    /// Issue the listing's verifiable credential and open the sale, or
    /// re-trigger the mint if the listing has no token range yet.
    #[tracing::instrument(skip_all, fields(listing_id = %id))]
    pub async fn create_nft_vc(
        &self,
        id: ListingId,
        caller: &Address,
    ) -> Result<CredentialOutcome, MarketError> {
        let listing = self.listings.get(id).await?;
        listing.authorize(caller)?;
        if listing.state.is_terminal() {
            return Err(MarketError::AlreadyInState(listing.state.description().to_string()));
        }
        if let Some(existing) = &listing.credential {
            return Err(MarketError::AlreadyInState(format!("credentialed ({})", existing.vc_id)));
        }

        let Some(range) = listing.token_range else {
            let contract = self
                .store
                .contract(listing.source_contract_id)
                .await?
                .ok_or_else(|| MarketError::NotFound(listing.source_contract_id.to_string()))?;
            let order = MintOrder {
                asset_ref: contract.asset_id,
                product_ref: contract.product_id,
                issued_to_address: listing.seller.address.clone(),
                issue_count: listing.issue_count,
            };
            let entry = self.mints.retrigger(id, order).await?;
            return Ok(CredentialOutcome::MintRetriggered(entry));
        };

        let user = self.user(listing.seller.user_id).await?;
        let wallet = self.store.wallet(user.id).await?;
        let Some(wallet_did) = wallet.as_ref().and_then(|w| w.wallet_did.clone()) else {
            return Err(MarketError::Conflict(format!("{} has no DID wallet", user.id)));
        };
        let vc_type = wallet
            .and_then(|w| w.vc_type)
            .unwrap_or_else(|| self.config.default_vc_type.clone());

        let credential_did = self
            .credentials
            .generate_credential_did(&user, &wallet_did)
            .await?;
        let issued = self
            .credentials
            .issue_credential(
                &user,
                &IssueCredentialRequest {
                    credential_did: credential_did.clone(),
                    holder_did: wallet_did,
                    vc_type,
                    claims: json!({
                        "marketListingId": listing.id,
                        "contractId": listing.source_contract_id,
                        "fromTokenId": range.from(),
                        "toTokenId": range.to(),
                        "issueCount": listing.issue_count,
                        "price": listing.price,
                    }),
                },
            )
            .await?;
        self.credentials
            .register_credential(&user, &credential_did, &issued.vc_id)
            .await?;

        let listing = self
            .listings
            .complete_credential(
                id,
                CredentialRecord {
                    vc_id: issued.vc_id,
                    issuer_name: issued.issuer_name,
                    type_name: issued.type_name,
                },
            )
            .await?;
        tracing::info!(state = %listing.state, "credential issued; listing on sale");
        Ok(CredentialOutcome::Issued(listing))
    }

    // ── Credential reads ────────────────────────────────────────────

    /// Provider detail of the credential bound to a listing.
    pub async fn credential_detail(&self, id: ListingId) -> Result<CredentialDetail, MarketError> {
        let listing = self.listings.get(id).await?;
        let Some(credential) = listing.credential else {
            return Err(MarketError::NotFound(format!("credential for {id}")));
        };
        let user = self.user(listing.seller.user_id).await?;
        self.credentials.fetch_detail(&user, &credential.vc_id).await
    }

    /// Provider metadata for a credential type. Defaults to the user's
    /// wallet type, then the configured type.
    pub async fn credential_meta(
        &self,
        user_id: UserId,
        vc_type: Option<&str>,
    ) -> Result<CredentialMeta, MarketError> {
        let user = self.user(user_id).await?;
        let vc_type = match vc_type {
            Some(t) => t.to_string(),
            None => self
                .store
                .wallet(user_id)
                .await?
                .and_then(|w| w.vc_type)
                .unwrap_or_else(|| self.config.default_vc_type.clone()),
        };
        self.credentials.fetch_meta(&user, &vc_type).await
    }
}

/// Registered ledger address, else the wallet DID.
fn seller_address(user: &UserRecord, wallet: &IdentityWalletRef) -> Result<Address, MarketError> {
    if let Some(address) = &user.address {
        return Ok(address.clone());
    }
    let did = wallet
        .wallet_did
        .as_deref()
        .ok_or_else(|| MarketError::Conflict(format!("{} has no DID wallet", user.id)))?;
    Ok(Address::new(did)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use nftm_core::TokenId;
    use nftm_gateway::DidOperation;
    use nftm_state::{ListingState, TokenRange};

    use crate::config::ConsistencyPolicy;
    use crate::store::{IdentityStore, ListingStore, MemoryStore, OutboxStatus, OutboxStore};
    use crate::testing::{LedgerMinter, RecordingMinter, ScriptedDid};

    fn config() -> SagaConfig {
        SagaConfig {
            consistency: ConsistencyPolicy {
                poll_interval: Duration::from_millis(100),
                max_retries: 5,
            },
            ..SagaConfig::default()
        }
    }

    fn sell(issue_count: i64) -> SellRequest {
        SellRequest {
            email: "lin@example.com".into(),
            nickname: "lin".into(),
            product_name: "Harbor at dusk".into(),
            description: "photograph".into(),
            file_name: "harbor.jpg".into(),
            content_type: "image/jpeg".into(),
            price: Price::new(12_000).unwrap(),
            issue_count,
            start_date: NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
            end_date: None,
        }
    }

    fn with_ledger() -> (MemoryStore, Arc<ScriptedDid>, SagaOrchestrator) {
        let store = MemoryStore::new();
        let did = Arc::new(ScriptedDid::new());
        let minter = Arc::new(LedgerMinter::new(store.clone(), 500));
        let saga = SagaOrchestrator::new(Arc::new(store.clone()), did.clone(), minter, config());
        (store, did, saga)
    }

    fn with_silent_minter() -> (MemoryStore, Arc<ScriptedDid>, Arc<RecordingMinter>, SagaOrchestrator) {
        let store = MemoryStore::new();
        let did = Arc::new(ScriptedDid::new());
        let minter = Arc::new(RecordingMinter::new());
        let saga = SagaOrchestrator::new(Arc::new(store.clone()), did.clone(), minter.clone(), config());
        (store, did, minter, saga)
    }

    #[tokio::test(start_paused = true)]
    async fn create_all_returns_minted_listing() {
        let (store, did, saga) = with_ledger();

        let listing = saga.create_all(sell(4)).await.unwrap();

        assert_eq!(listing.token_range, Some(TokenRange::new(TokenId(500), TokenId(503)).unwrap()));
        assert_eq!(listing.state, ListingState::PendingMint);
        assert_eq!(listing.seller.address.as_str(), "did:wallet:1");
        assert_eq!(did.count(DidOperation::ConnectUser), 1);
        assert_eq!(did.count(DidOperation::CreateWallet), 1);
        let wallet = store.wallet(listing.seller.user_id).await.unwrap().unwrap();
        assert_eq!(wallet.wallet_did.as_deref(), Some("did:wallet:1"));
        let entry = store.outbox_for_listing(listing.id).await.unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn create_all_reuses_existing_wallet() {
        let (_store, did, saga) = with_ledger();
        saga.create_all(sell(1)).await.unwrap();
        saga.create_all(sell(1)).await.unwrap();
        assert_eq!(did.count(DidOperation::ConnectUser), 1);
        assert_eq!(did.count(DidOperation::CreateWallet), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn create_all_reports_committed_steps_on_listing_failure() {
        let (store, _did, saga) = with_ledger();
        store.fail_next_listing_insert();

        let err = saga.create_all(sell(2)).await.unwrap_err();

        match err {
            MarketError::PartialSagaFailure { completed, source } => {
                assert!(matches!(completed[0], SagaStep::UserEnsured(_)));
                assert!(matches!(completed[1], SagaStep::WalletEnsured(_)));
                assert!(matches!(completed[2], SagaStep::ProductCreated(_)));
                assert!(matches!(completed[3], SagaStep::AssetCreated(_)));
                assert!(matches!(completed[4], SagaStep::ContractCreated(_)));
                assert_eq!(completed.len(), 5);
                assert!(matches!(*source, MarketError::Store(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_all_identity_rejection_is_not_partial() {
        let (_store, did, saga) = with_ledger();
        did.push_failure(DidOperation::ConnectUser, "NoRegistration", None);

        let err = saga.create_all(sell(2)).await.unwrap_err();

        assert!(matches!(err, MarketError::CredentialRejected { .. }), "{err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn create_all_surfaces_consistency_timeout() {
        let (store, _did, _minter, saga) = with_silent_minter();

        let err = saga.create_all(sell(3)).await.unwrap_err();

        let MarketError::ConsistencyTimeout { listing_id, attempts } = err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(attempts, 5);
        let stored = store.listing(listing_id).await.unwrap().unwrap();
        assert_eq!(stored.state, ListingState::PendingMint);
        assert!(stored.token_range.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn credential_issuance_opens_the_sale() {
        let (_store, did, saga) = with_ledger();
        let listing = saga.create_all(sell(3)).await.unwrap();
        let owner = listing.seller.address.clone();

        let outcome = saga.create_nft_vc(listing.id, &owner).await.unwrap();

        let CredentialOutcome::Issued(listing) = outcome else {
            panic!("expected issuance, got {outcome:?}");
        };
        assert_eq!(listing.state, ListingState::OnSale);
        assert_eq!(listing.credential.as_ref().unwrap().vc_id, "vc-1");
        assert_eq!(did.count(DidOperation::GenerateCredentialDid), 1);
        assert_eq!(did.count(DidOperation::RegisterCredential), 1);

        let err = saga.create_nft_vc(listing.id, &owner).await.unwrap_err();
        assert!(matches!(err, MarketError::AlreadyInState(_)));

        let detail = saga.credential_detail(listing.id).await.unwrap();
        assert_eq!(detail.vc_id, "vc-1");
    }

    #[tokio::test(start_paused = true)]
    async fn credential_issuance_survives_one_jwt_expiry() {
        let (store, did, saga) = with_ledger();
        let listing = saga.create_all(sell(2)).await.unwrap();
        store
            .save_jwt(listing.seller.user_id, Some("expired".into()))
            .await
            .unwrap();
        did.push_failure(
            DidOperation::GenerateCredentialDid,
            "io.jsonwebtoken.ExpiredJwtException",
            Some("JWT expired at 2026-10-18T09:00:00Z"),
        );

        let outcome = saga
            .create_nft_vc(listing.id, &listing.seller.address)
            .await
            .unwrap();

        assert!(matches!(outcome, CredentialOutcome::Issued(_)));
        assert_eq!(did.count(DidOperation::ConnectUser), 2);
        assert_eq!(did.count(DidOperation::GenerateCredentialDid), 2);
        let wallet = store.wallet(listing.seller.user_id).await.unwrap().unwrap();
        assert_eq!(wallet.jwt.as_deref(), Some("jwt-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn unminted_listing_does_not_resend_an_accepted_mint() {
        let (store, did, minter, saga) = with_silent_minter();
        let err = saga.create_all(sell(2)).await.unwrap_err();
        let MarketError::ConsistencyTimeout { listing_id, .. } = err else {
            panic!("unexpected error: {err:?}");
        };
        let listing = store.listing(listing_id).await.unwrap().unwrap();
        assert_eq!(minter.requests().len(), 1);

        let outcome = saga
            .create_nft_vc(listing_id, &listing.seller.address)
            .await
            .unwrap();

        let CredentialOutcome::MintRetriggered(entry) = outcome else {
            panic!("expected a mint re-trigger, got {outcome:?}");
        };
        assert_eq!(entry.listing_id, listing_id);
        assert_eq!(entry.status, OutboxStatus::Dispatched);
        assert_eq!(entry.attempts, 1);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(minter.requests().len(), 1);
        assert_eq!(did.count(DidOperation::IssueCredential), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unminted_listing_resends_a_failed_mint() {
        let (store, _did, minter, saga) = with_silent_minter();
        minter.refuse(true);
        let err = saga.create_all(sell(2)).await.unwrap_err();
        let MarketError::ConsistencyTimeout { listing_id, .. } = err else {
            panic!("unexpected error: {err:?}");
        };
        let failed = store.outbox_for_listing(listing_id).await.unwrap().unwrap();
        assert_eq!(failed.status, OutboxStatus::Failed);
        let listing = store.listing(listing_id).await.unwrap().unwrap();

        minter.refuse(false);
        let outcome = saga
            .create_nft_vc(listing_id, &listing.seller.address)
            .await
            .unwrap();
        let CredentialOutcome::MintRetriggered(entry) = outcome else {
            panic!("expected a mint re-trigger, got {outcome:?}");
        };
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.request.issue_count, 2);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(minter.requests().len(), 1);
        let sent = store.outbox_for_listing(listing_id).await.unwrap().unwrap();
        assert_eq!(sent.status, OutboxStatus::Dispatched);
    }

    #[tokio::test(start_paused = true)]
    async fn credential_calls_require_ownership() {
        let (_store, _did, saga) = with_ledger();
        let listing = saga.create_all(sell(1)).await.unwrap();
        let err = saga
            .create_nft_vc(listing.id, &Address::new("0xsomeone").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Unauthorized(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn credential_reads() {
        let (_store, did, saga) = with_ledger();
        let listing = saga.create_all(sell(1)).await.unwrap();

        let err = saga.credential_detail(listing.id).await.unwrap_err();
        assert!(matches!(err, MarketError::NotFound(_)));

        let meta = saga
            .credential_meta(listing.seller.user_id, None)
            .await
            .unwrap();
        assert_eq!(meta.vc_type, "NftOwnershipCredential");
        assert_eq!(did.count(DidOperation::FetchMeta), 1);
    }
}
