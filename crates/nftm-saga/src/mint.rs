//! # Mint Coordination
//!
//! Bridges the synchronous caller and the asynchronous minter.
//!
//! A listing that needs minting is inserted together with a mint outbox
//! entry. [`MintCoordinator::trigger_mint`] then dispatches that entry on a
//! spawned task and returns immediately; a failed dispatch stays visible in
//! the outbox and is retried by [`MintCoordinator::dispatch_pending`].
//!
//! The minter reports back by writing mint records into the store. Binding
//! those records to the listing's token range is reconciliation: the worker
//! does it in bulk ([`MintCoordinator::reconcile_minted`]) and
//! [`MintCoordinator::await_consistency`] does it for one listing on every
//! poll.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use nftm_core::{ListingId, TokenId};
use nftm_gateway::MintTransport;
use nftm_state::{
    latest_transfers, merge_ownership, minted_range, untransferred, Listing, TokenOwner,
    TokenRange,
};

use crate::config::{ConsistencyPolicy, OutboxPolicy};
use crate::error::MarketError;
use crate::store::{MarketStore, MintOrder, OutboxEntry, OutboxStatus};

/// What happened to one outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    /// Another dispatcher owns it, or it is no longer claimable.
    Skipped,
    Accepted,
    Refused,
}

/// Counters from one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub claimed: usize,
    pub dispatched: usize,
    pub failed: usize,
}

/// Issues mint requests and observes their results.
#[derive(Clone)]
pub struct MintCoordinator {
    store: Arc<dyn MarketStore>,
    minter: Arc<dyn MintTransport>,
    policy: OutboxPolicy,
}

impl std::fmt::Debug for MintCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MintCoordinator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl MintCoordinator {
    pub fn new(store: Arc<dyn MarketStore>, minter: Arc<dyn MintTransport>, policy: OutboxPolicy) -> Self {
        Self {
            store,
            minter,
            policy,
        }
    }

    fn stale_before(&self) -> chrono::DateTime<Utc> {
        let lease = chrono::Duration::from_std(self.policy.claim_lease)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        Utc::now() - lease
    }

    // ── Trigger ─────────────────────────────────────────────────────

    /// Dispatch an outbox entry on a background task without awaiting it.
    ///
    /// Must be called from within a Tokio runtime. The returned handle may be
    /// dropped; the outcome is recorded on the outbox entry either way.
    pub fn trigger_mint(&self, entry: OutboxEntry) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let listing_id = entry.listing_id;
            if let Err(e) = this.dispatch_entry(entry).await {
                tracing::warn!(%listing_id, error = %e, "mint trigger failed; left for the outbox worker");
            }
        })
    }

    /// Make sure the listing's mint is on its way.
    ///
    /// A failed (or missing) entry is reset with a fresh request and
    /// dispatched. A pending entry is dispatched as is. An entry the minter
    /// may already hold is returned untouched, since sending it again would
    /// mint a second edition.
    pub async fn retrigger(&self, listing_id: ListingId, order: MintOrder) -> Result<OutboxEntry, MarketError> {
        let entry = self.store.requeue_mint(order.for_listing(listing_id)).await?;
        if entry.status == OutboxStatus::Pending {
            tracing::info!(%listing_id, outbox_id = %entry.id, "mint re-triggered");
            self.trigger_mint(entry.clone());
        } else {
            tracing::info!(
                %listing_id,
                outbox_id = %entry.id,
                status = %entry.status,
                "mint already in flight; not re-sent"
            );
        }
        Ok(entry)
    }

    /// Claim and send one entry, recording the outcome on it.
    async fn dispatch_entry(&self, entry: OutboxEntry) -> Result<Dispatch, MarketError> {
        let Some(claimed) = self
            .store
            .claim_outbox(entry.id, self.policy.max_attempts, self.stale_before())
            .await?
        else {
            tracing::debug!(outbox_id = %entry.id, "outbox entry already claimed");
            return Ok(Dispatch::Skipped);
        };

        let outcome = self.minter.mint(&claimed.request).await;
        match &outcome {
            Ok(()) => tracing::info!(
                listing_id = %claimed.listing_id,
                attempt = claimed.attempts + 1,
                "mint dispatched"
            ),
            Err(e) => tracing::warn!(
                listing_id = %claimed.listing_id,
                attempt = claimed.attempts + 1,
                error = %e,
                "mint dispatch failed"
            ),
        }
        let dispatch = if outcome.is_ok() {
            Dispatch::Accepted
        } else {
            Dispatch::Refused
        };
        self.store
            .record_dispatch(claimed.id, outcome.map_err(|e| e.to_string()))
            .await?;
        Ok(dispatch)
    }

    // ── Worker passes ───────────────────────────────────────────────

    /// Dispatch every claimable entry, up to the batch size.
    pub async fn dispatch_pending(&self) -> Result<DispatchReport, MarketError> {
        let entries = self
            .store
            .claimable_outbox(self.policy.max_attempts, self.stale_before(), self.policy.batch_size)
            .await?;
        let mut report = DispatchReport::default();
        for entry in entries {
            let id = entry.id;
            match self.dispatch_entry(entry).await {
                Ok(Dispatch::Skipped) => {}
                Ok(Dispatch::Accepted) => {
                    report.claimed += 1;
                    report.dispatched += 1;
                }
                Ok(Dispatch::Refused) => {
                    report.claimed += 1;
                    report.failed += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(outbox_id = %id, error = %e, "outbox dispatch error");
                }
            }
        }
        if report.claimed > 0 {
            tracing::info!(
                claimed = report.claimed,
                dispatched = report.dispatched,
                failed = report.failed,
                "outbox dispatch pass complete"
            );
        }
        Ok(report)
    }

    /// Bind token ranges for dispatched entries whose mint records are
    /// visible, one batch per call. Returns the number of listings completed.
    ///
    /// Each call takes the least recently checked batch, so entries whose
    /// mint never lands cannot hold back newer ones. An entry still unminted
    /// past `mint_deadline` after its dispatch is failed; the dispatch pass
    /// retries it until `max_attempts`, after which it stays failed for
    /// operators.
    pub async fn reconcile_minted(&self) -> Result<usize, MarketError> {
        let entries = self.store.next_dispatched(self.policy.batch_size).await?;
        let deadline = chrono::Duration::from_std(self.policy.mint_deadline)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        let dispatched_before = Utc::now() - deadline;

        let mut completed = 0;
        let mut expired = 0;
        for entry in entries {
            match self.reconcile_listing(entry.listing_id).await {
                Ok(Some(listing)) if listing.is_minted() => {
                    // Bound by an earlier poll; the entry may still read Dispatched.
                    if let Err(e) = self.store.complete_outbox(listing.id).await {
                        tracing::error!(listing_id = %listing.id, error = %e, "outbox completion failed");
                        continue;
                    }
                    completed += 1;
                }
                Ok(Some(_)) if entry.updated_at < dispatched_before => {
                    let reason = format!("mint not observed within {deadline}");
                    match self.store.expire_dispatched(entry.id, dispatched_before, reason).await {
                        Ok(Some(failed)) => {
                            expired += 1;
                            tracing::warn!(
                                listing_id = %failed.listing_id,
                                attempts = failed.attempts,
                                "accepted mint never observed; entry failed"
                            );
                        }
                        Ok(None) => {}
                        Err(e) => tracing::error!(listing_id = %entry.listing_id, error = %e, "outbox expiry failed"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(listing_id = %entry.listing_id, error = %e, "reconciliation failed")
                }
            }
        }
        if completed > 0 || expired > 0 {
            tracing::info!(completed, expired, "mint reconciliation pass complete");
        }
        Ok(completed)
    }

    /// Load a listing and, if it is still unminted but its mint records are
    /// all visible, bind the token range. `None` if the listing is absent.
    async fn reconcile_listing(&self, id: ListingId) -> Result<Option<Listing>, MarketError> {
        let Some(listing) = self.store.listing(id).await? else {
            return Ok(None);
        };
        if listing.is_minted() {
            return Ok(Some(listing));
        }

        let records = self.store.mints_for_listing(id).await?;
        let Some(range) = minted_range(&records, listing.issue_count) else {
            return Ok(Some(listing));
        };

        let now = Utc::now();
        let bound = self
            .store
            .update_listing(id, Box::new(move |l: &mut Listing| l.bind_token_range(range, now)))
            .await?;
        self.store.complete_outbox(id).await?;
        tracing::info!(listing_id = %id, %range, "token range bound");
        Ok(Some(bound))
    }

    // ── Consistency ─────────────────────────────────────────────────

    /// Poll until the listing carries a mint result.
    ///
    /// Polls exactly `policy.max_retries` times, sleeping `poll_interval`
    /// between two polls. Dropping the returned future stops polling at the
    /// next suspension point.
    #[tracing::instrument(skip_all, fields(listing_id = %id))]
    pub async fn await_consistency(
        &self,
        id: ListingId,
        policy: ConsistencyPolicy,
    ) -> Result<Listing, MarketError> {
        let attempts = policy.max_retries.max(1);
        let mut seen = false;
        for attempt in 1..=attempts {
            match self.reconcile_listing(id).await? {
                Some(listing) if listing.is_minted() => {
                    tracing::debug!(attempt, "listing minted");
                    return Ok(listing);
                }
                Some(_) => seen = true,
                None => seen = false,
            }
            tracing::debug!(attempt, max = attempts, "listing not minted yet");
            if attempt < attempts {
                tokio::time::sleep(policy.poll_interval).await;
            }
        }

        if !seen {
            return Err(MarketError::NotFound(id.to_string()));
        }
        tracing::warn!(attempts, "consistency poll timed out");
        Err(MarketError::ConsistencyTimeout {
            listing_id: id,
            attempts,
        })
    }

    // ── Ownership ───────────────────────────────────────────────────

    /// Current owner of every token in `[from, to]`, ascending by token id.
    ///
    /// The highest-sequence transfer wins; tokens never transferred resolve
    /// to their mint record. Tokens with neither are omitted.
    pub async fn resolve_token_ownership(
        &self,
        from: TokenId,
        to: TokenId,
    ) -> Result<Vec<TokenOwner>, MarketError> {
        let range = TokenRange::new(from, to).map_err(|e| MarketError::Validation(e.to_string()))?;
        let latest = latest_transfers(self.store.transfers_in_range(range).await?);
        let missing = untransferred(range, &latest);
        let mints = self.store.mints_for_tokens(&missing).await?;
        Ok(merge_ownership(latest, mints))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::NaiveDate;
    use nftm_core::{Address, ContractId, Price, UserId};
    use nftm_state::{ListingDraft, ListingState, MintRecord, OwnershipSource, Seller, TransferRecord};

    use crate::store::{CatalogStore, IdentityStore, ListingStore, MemoryStore, NewAsset, NewContract, NewProduct, NewUser, OutboxStatus, OutboxStore, SourceContract};
    use crate::testing::RecordingMinter;

    struct Harness {
        store: MemoryStore,
        minter: Arc<RecordingMinter>,
        mints: MintCoordinator,
        contract: SourceContract,
    }

    async fn harness() -> Harness {
        harness_with(OutboxPolicy::default()).await
    }

    async fn harness_with(policy: OutboxPolicy) -> Harness {
        let store = MemoryStore::new();
        let user = store
            .ensure_user(NewUser {
                email: "seller@example.com".into(),
                nickname: "seller".into(),
            })
            .await
            .unwrap();
        let product = store
            .create_product(NewProduct {
                owner: user.id,
                name: "Poster".into(),
                description: String::new(),
            })
            .await
            .unwrap();
        let asset = store
            .create_asset(NewAsset {
                owner: user.id,
                product_id: product,
                file_name: "poster.png".into(),
                content_type: "image/png".into(),
            })
            .await
            .unwrap();
        let contract = store
            .create_contract(NewContract {
                owner: user.id,
                product_id: product,
                asset_id: asset,
            })
            .await
            .unwrap();
        let minter = Arc::new(RecordingMinter::new());
        let mints = MintCoordinator::new(Arc::new(store.clone()), minter.clone(), policy);
        Harness {
            store,
            minter,
            mints,
            contract,
        }
    }

    fn seller() -> Address {
        Address::new("0xseller").unwrap()
    }

    async fn pending_listing(h: &Harness, issue_count: i64) -> (Listing, OutboxEntry) {
        let draft = ListingDraft {
            source_contract_id: h.contract.id,
            seller: Seller {
                user_id: UserId(1),
                address: seller(),
                name: "Seller".into(),
            },
            price: Price::new(100).unwrap(),
            issue_count,
            start_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            end_date: None,
            token_range: None,
            parent_purchase: None,
            initial_state: ListingState::PendingMint,
        };
        let (listing, entry) = h.store.insert_listing(draft, Some(order(h, issue_count))).await.unwrap();
        (listing, entry.unwrap())
    }

    fn order(h: &Harness, issue_count: i64) -> MintOrder {
        MintOrder {
            asset_ref: h.contract.asset_id,
            product_ref: h.contract.product_id,
            issued_to_address: seller(),
            issue_count,
        }
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn consistency_timeout_after_exactly_max_retries_polls() {
        let h = harness().await;
        let (listing, _) = pending_listing(&h, 5).await;
        let before = h.store.listing_reads();

        let policy = ConsistencyPolicy {
            poll_interval: Duration::from_millis(200),
            max_retries: 3,
        };
        let err = h.mints.await_consistency(listing.id, policy).await.unwrap_err();

        assert!(matches!(
            err,
            MarketError::ConsistencyTimeout { attempts: 3, .. }
        ));
        assert_eq!(h.store.listing_reads() - before, 3);
        let stored = h.store.listing(listing.id).await.unwrap().unwrap();
        assert_eq!(stored.state, ListingState::PendingMint);
        assert_eq!(stored.token_range, None);
    }

    #[tokio::test(start_paused = true)]
    async fn consistency_on_missing_listing_is_not_found() {
        let h = harness().await;
        let policy = ConsistencyPolicy {
            poll_interval: Duration::from_millis(10),
            max_retries: 2,
        };
        let err = h.mints.await_consistency(ListingId(999), policy).await.unwrap_err();
        assert!(matches!(err, MarketError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_still_polls_once() {
        let h = harness().await;
        let (listing, _) = pending_listing(&h, 1).await;
        let before = h.store.listing_reads();

        let policy = ConsistencyPolicy {
            poll_interval: Duration::from_millis(10),
            max_retries: 0,
        };
        let err = h.mints.await_consistency(listing.id, policy).await.unwrap_err();

        assert!(matches!(err, MarketError::ConsistencyTimeout { attempts: 1, .. }), "{err:?}");
        assert_eq!(h.store.listing_reads() - before, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn consistency_binds_range_once_mint_records_land() {
        let h = harness().await;
        let (listing, _) = pending_listing(&h, 3).await;

        let store = h.store.clone();
        let contract_id = h.contract.id;
        let id = listing.id;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            store.record_edition(id, contract_id, TokenId(40), 3, &Address::new("0xseller").unwrap());
        });

        let policy = ConsistencyPolicy {
            poll_interval: Duration::from_millis(200),
            max_retries: 5,
        };
        let minted = h.mints.await_consistency(listing.id, policy).await.unwrap();
        assert_eq!(
            minted.token_range,
            Some(TokenRange::new(TokenId(40), TokenId(42)).unwrap())
        );
        let entry = h.store.outbox_for_listing(listing.id).await.unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Completed);
    }

    #[tokio::test]
    async fn trigger_mint_dispatches_in_background() {
        let h = harness().await;
        let (listing, entry) = pending_listing(&h, 2).await;

        h.mints.trigger_mint(entry).await.unwrap();

        let requests = h.minter.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].market_listing_id, listing.id);
        let entry = h.store.outbox_for_listing(listing.id).await.unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Dispatched);
        assert_eq!(entry.attempts, 1);
    }

    #[tokio::test]
    async fn refused_mint_is_retried_by_worker_pass() {
        let h = harness().await;
        let (listing, entry) = pending_listing(&h, 2).await;

        h.minter.refuse(true);
        h.mints.trigger_mint(entry).await.unwrap();
        let failed = h.store.outbox_for_listing(listing.id).await.unwrap().unwrap();
        assert_eq!(failed.status, OutboxStatus::Failed);
        assert!(failed.last_error.unwrap().contains("503"));

        h.minter.refuse(false);
        let report = h.mints.dispatch_pending().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.failed, 0);
        let entry = h.store.outbox_for_listing(listing.id).await.unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Dispatched);
        assert_eq!(entry.attempts, 2);
    }

    #[tokio::test]
    async fn worker_pass_reports_refusals() {
        let h = harness().await;
        pending_listing(&h, 1).await;
        h.minter.refuse(true);
        let report = h.mints.dispatch_pending().await.unwrap();
        assert_eq!(
            report,
            DispatchReport {
                claimed: 1,
                dispatched: 0,
                failed: 1
            }
        );
    }

    #[tokio::test]
    async fn reconcile_skips_incomplete_editions() {
        let h = harness().await;
        let (listing, entry) = pending_listing(&h, 3).await;
        h.mints.trigger_mint(entry).await.unwrap();

        h.store.record_edition(listing.id, h.contract.id, TokenId(1), 2, &seller());
        assert_eq!(h.mints.reconcile_minted().await.unwrap(), 0);

        h.store.record_edition(listing.id, h.contract.id, TokenId(3), 1, &seller());
        assert_eq!(h.mints.reconcile_minted().await.unwrap(), 1);
        let stored = h.store.listing(listing.id).await.unwrap().unwrap();
        assert_eq!(stored.token_range, Some(TokenRange::new(TokenId(1), TokenId(3)).unwrap()));
    }

    #[tokio::test]
    async fn retrigger_leaves_an_accepted_mint_alone() {
        let h = harness().await;
        let (listing, entry) = pending_listing(&h, 2).await;
        h.mints.trigger_mint(entry).await.unwrap();

        let entry = h.mints.retrigger(listing.id, order(&h, 2)).await.unwrap();
        settle().await;

        assert_eq!(entry.status, OutboxStatus::Dispatched);
        assert_eq!(entry.attempts, 1);
        assert_eq!(h.minter.requests().len(), 1);
    }

    #[tokio::test]
    async fn retrigger_during_dispatch_sends_once() {
        let h = harness().await;
        let (listing, entry) = pending_listing(&h, 2).await;
        let claimed = h
            .store
            .claim_outbox(entry.id, 5, Utc::now() - chrono::Duration::seconds(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.status, OutboxStatus::Dispatching);

        let entry = h.mints.retrigger(listing.id, order(&h, 2)).await.unwrap();
        settle().await;

        assert_eq!(entry.status, OutboxStatus::Dispatching);
        assert!(h.minter.requests().is_empty());
    }

    #[tokio::test]
    async fn double_minted_listing_binds_its_first_edition() {
        let h = harness().await;
        let (listing, entry) = pending_listing(&h, 2).await;
        h.mints.trigger_mint(entry).await.unwrap();

        h.store.record_edition(listing.id, h.contract.id, TokenId(1), 2, &seller());
        h.store.record_edition(listing.id, h.contract.id, TokenId(3), 2, &seller());

        assert_eq!(h.mints.reconcile_minted().await.unwrap(), 1);
        let stored = h.store.listing(listing.id).await.unwrap().unwrap();
        assert_eq!(stored.token_range, Some(TokenRange::new(TokenId(1), TokenId(2)).unwrap()));
        let entry = h.store.outbox_for_listing(listing.id).await.unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Completed);
    }

    #[tokio::test]
    async fn reconcile_rotates_past_entries_that_never_mint() {
        let h = harness_with(OutboxPolicy {
            batch_size: 2,
            ..OutboxPolicy::default()
        })
        .await;
        let mut listings = Vec::new();
        for _ in 0..3 {
            let (listing, entry) = pending_listing(&h, 1).await;
            h.mints.trigger_mint(entry).await.unwrap();
            listings.push(listing);
        }
        let third = &listings[2];
        h.store.record_edition(third.id, h.contract.id, TokenId(30), 1, &seller());

        let mut completed = 0;
        for _ in 0..2 {
            completed += h.mints.reconcile_minted().await.unwrap();
        }

        assert_eq!(completed, 1);
        let stored = h.store.listing(third.id).await.unwrap().unwrap();
        assert_eq!(stored.token_range, Some(TokenRange::new(TokenId(30), TokenId(30)).unwrap()));
        let first = h.store.outbox_for_listing(listings[0].id).await.unwrap().unwrap();
        assert_eq!(first.status, OutboxStatus::Dispatched);
    }

    #[tokio::test]
    async fn unobserved_mint_is_failed_then_redispatched_until_exhausted() {
        let h = harness_with(OutboxPolicy {
            max_attempts: 2,
            mint_deadline: Duration::ZERO,
            ..OutboxPolicy::default()
        })
        .await;
        let (listing, entry) = pending_listing(&h, 1).await;
        h.mints.trigger_mint(entry).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(h.mints.reconcile_minted().await.unwrap(), 0);
        let expired = h.store.outbox_for_listing(listing.id).await.unwrap().unwrap();
        assert_eq!(expired.status, OutboxStatus::Failed);
        assert!(expired.last_error.unwrap().contains("not observed"));

        let report = h.mints.dispatch_pending().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(h.minter.requests().len(), 2);

        tokio::time::sleep(Duration::from_millis(5)).await;
        h.mints.reconcile_minted().await.unwrap();
        let report = h.mints.dispatch_pending().await.unwrap();
        assert_eq!(report.claimed, 0);
        let exhausted = h.store.outbox_for_listing(listing.id).await.unwrap().unwrap();
        assert_eq!(exhausted.status, OutboxStatus::Failed);
        assert_eq!(exhausted.attempts, 2);
    }

    #[tokio::test]
    async fn ownership_prefers_latest_transfer() {
        let h = harness().await;
        for token in [10, 11, 12] {
            h.store.record_mint(MintRecord {
                token_id: TokenId(token),
                issued_to: Address::new("0xminted").unwrap(),
                contract_id: ContractId(1),
                tx_id: format!("m{token}"),
                listing_id: None,
            });
        }
        for (seq, to) in [(3, "0xcurrent"), (1, "0xstale")] {
            h.store.record_transfer(TransferRecord {
                token_id: TokenId(11),
                to_address: Address::new(to).unwrap(),
                sequence_no: seq,
                contract_id: ContractId(1),
                tx_id: format!("t{seq}"),
            });
        }

        let owners = h
            .mints
            .resolve_token_ownership(TokenId(10), TokenId(12))
            .await
            .unwrap();

        assert_eq!(owners.len(), 3);
        assert_eq!(owners[0].owner.as_str(), "0xminted");
        assert_eq!(owners[0].source, OwnershipSource::Mint);
        assert_eq!(owners[1].token_id, TokenId(11));
        assert_eq!(owners[1].owner.as_str(), "0xcurrent");
        assert_eq!(owners[1].source, OwnershipSource::Transfer { sequence_no: 3 });
        assert_eq!(owners[2].owner.as_str(), "0xminted");
    }

    #[tokio::test]
    async fn ownership_rejects_inverted_range() {
        let h = harness().await;
        let err = h
            .mints
            .resolve_token_ownership(TokenId(5), TokenId(4))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
    }
}
