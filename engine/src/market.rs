//! Marketplace coordination.
//!
//! Listing moves a bond from the seller's personal collection into their
//! sale collection; purchase moves it to the buyer and pays the seller;
//! withdraw moves it back. The ledger owns custody - this coordinator only
//! sequences the mutations, reports status per bond, and enumerates
//! listings across an externally supplied seller allow-list (discovery of
//! unknown sellers is out of scope).
//!
//! Purchases priced in an alternate asset go through [`QuoteTracker`],
//! which debounces rapid amount changes and guarantees that only the most
//! recently requested quote can land in the observable state. Superseded
//! and stale quote resolutions are discarded by sequence comparison.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use bondflow_gateway::{
    ClassifiedError, LedgerMutationGateway, LedgerQueryGateway, MutationRequest, Payment,
    QueryRequest, QuoteGateway, classify, submit_and_seal,
};
use bondflow_types::{Address, Amount, AssetId, Bond, BondId, MarketplaceListing, TxId};

use crate::locks::BondLocks;
use crate::query::decode;
use crate::status::{Phase, StatusBoard, StatusSlot};
use crate::EngineError;

pub struct MarketplaceCoordinator {
    queries: Arc<dyn LedgerQueryGateway>,
    mutations: Arc<dyn LedgerMutationGateway>,
    statuses: StatusBoard,
    locks: BondLocks,
}

impl MarketplaceCoordinator {
    #[must_use]
    pub fn new(
        queries: Arc<dyn LedgerQueryGateway>,
        mutations: Arc<dyn LedgerMutationGateway>,
        locks: BondLocks,
    ) -> Self {
        Self {
            queries,
            mutations,
            statuses: StatusBoard::new(),
            locks,
        }
    }

    /// The status slot for marketplace operations on one bond.
    #[must_use]
    pub fn status(&self, id: BondId) -> StatusSlot {
        self.statuses.slot(id)
    }

    /// Offer `bond` for sale at `price`.
    pub async fn list_for_sale(
        &self,
        seller: &Address,
        bond: &Bond,
        price: Amount,
    ) -> Result<TxId, EngineError> {
        if !price.is_positive() {
            return Err(EngineError::InvalidPrice);
        }

        let slot = self.statuses.slot(bond.id);
        slot.begin(Phase::Listing)?;
        let result = self
            .submit_locked(bond.id, MutationRequest::list_for_sale(seller, bond.id, price))
            .await;
        match result {
            Ok(tx_id) => {
                info!(bond = %bond.id, %price, %tx_id, "bond listed for sale");
                slot.succeed(tx_id.clone());
                Ok(tx_id)
            }
            Err(error) => {
                slot.fail(error.classified(), error.tx_id().cloned());
                Err(error)
            }
        }
    }

    /// Buy a listed bond, paying in the base asset or an alternate one.
    pub async fn purchase(
        &self,
        buyer: &Address,
        listing: &MarketplaceListing,
        payment: &Payment,
    ) -> Result<TxId, EngineError> {
        let slot = self.statuses.slot(listing.bond_id);
        slot.begin(Phase::Purchasing)?;
        let request = MutationRequest::purchase_listing(
            buyer,
            &listing.seller,
            listing.bond_id,
            payment,
        );
        match self.submit_locked(listing.bond_id, request).await {
            Ok(tx_id) => {
                info!(bond = %listing.bond_id, price = %listing.price, %tx_id, "bond purchased");
                slot.succeed(tx_id.clone());
                Ok(tx_id)
            }
            Err(error) => {
                slot.fail(error.classified(), error.tx_id().cloned());
                Err(error)
            }
        }
    }

    /// Take a listing down, returning the bond to the seller's personal
    /// collection.
    pub async fn withdraw(
        &self,
        listing: &MarketplaceListing,
    ) -> Result<TxId, EngineError> {
        let slot = self.statuses.slot(listing.bond_id);
        slot.begin(Phase::Withdrawing)?;
        let request = MutationRequest::withdraw_listing(&listing.seller, listing.bond_id);
        match self.submit_locked(listing.bond_id, request).await {
            Ok(tx_id) => {
                info!(bond = %listing.bond_id, %tx_id, "listing withdrawn");
                slot.succeed(tx_id.clone());
                Ok(tx_id)
            }
            Err(error) => {
                slot.fail(error.classified(), error.tx_id().cloned());
                Err(error)
            }
        }
    }

    async fn submit_locked(
        &self,
        id: BondId,
        request: MutationRequest,
    ) -> Result<TxId, EngineError> {
        let _guard = self.locks.acquire(id)?;
        Ok(submit_and_seal(self.mutations.as_ref(), request).await?)
    }

    /// All available listings across the known sellers, queried
    /// concurrently. A seller whose query fails is dropped with a warning.
    pub async fn get_listings(&self, known_sellers: &[Address]) -> Vec<MarketplaceListing> {
        let results = join_all(known_sellers.iter().map(|seller| async move {
            let value = self
                .queries
                .execute(QueryRequest::sale_listings(seller))
                .await?;
            if value.is_null() {
                return Ok(Vec::new());
            }
            decode::<Vec<MarketplaceListing>>(value)
        }))
        .await;

        known_sellers
            .iter()
            .zip(results)
            .flat_map(|(seller, result)| match result {
                Ok(listings) => listings,
                Err(error) => {
                    warn!(%seller, %error, "dropping seller from listings batch");
                    Vec::new()
                }
            })
            .filter(|listing: &MarketplaceListing| listing.is_available)
            .collect()
    }
}

// ============================================================================
// Cross-asset quotes
// ============================================================================

/// Delay between the last amount change and the quote request actually
/// going out.
pub const QUOTE_DEBOUNCE: Duration = Duration::from_millis(300);

/// Observable state of the latest quote request.
#[derive(Debug, Clone, PartialEq)]
pub enum QuoteState {
    Empty,
    Pending {
        seq: u64,
    },
    Ready {
        seq: u64,
        asset: AssetId,
        base_amount: Amount,
        quoted: Amount,
    },
    Failed {
        seq: u64,
        error: ClassifiedError,
    },
}

/// Debounced, superseding quote requests for alternate-asset purchases.
///
/// Each `request` claims the next sequence number. The spawned task checks
/// the sequence twice - before dispatching (debounce window) and after the
/// gateway answers - so a response belonging to anything but the newest
/// request is discarded and can never overwrite the state.
#[derive(Clone)]
pub struct QuoteTracker {
    gateway: Arc<dyn QuoteGateway>,
    seq: Arc<AtomicU64>,
    state: Arc<watch::Sender<QuoteState>>,
    debounce: Duration,
}

impl QuoteTracker {
    #[must_use]
    pub fn new(gateway: Arc<dyn QuoteGateway>) -> Self {
        Self::with_debounce(gateway, QUOTE_DEBOUNCE)
    }

    #[must_use]
    pub fn with_debounce(gateway: Arc<dyn QuoteGateway>, debounce: Duration) -> Self {
        let (state, _) = watch::channel(QuoteState::Empty);
        Self {
            gateway,
            seq: Arc::new(AtomicU64::new(0)),
            state: Arc::new(state),
            debounce,
        }
    }

    /// Observe quote resolutions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<QuoteState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn current(&self) -> QuoteState {
        self.state.borrow().clone()
    }

    /// Ask how much of `asset` covers `base_amount` of the base asset.
    ///
    /// Supersedes any earlier request that has not resolved yet.
    pub fn request(&self, asset: AssetId, base_amount: Amount) {
        let seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
        self.state.send_replace(QuoteState::Pending { seq });

        let gateway = Arc::clone(&self.gateway);
        let latest = Arc::clone(&self.seq);
        let state = Arc::clone(&self.state);
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if latest.load(Ordering::Acquire) != seq {
                debug!(seq, "quote request superseded before dispatch");
                return;
            }

            let result = gateway.quote(&asset, base_amount).await;
            if latest.load(Ordering::Acquire) != seq {
                debug!(seq, "discarding stale quote response");
                return;
            }

            let next = match result {
                Ok(quoted) => QuoteState::Ready {
                    seq,
                    asset,
                    base_amount,
                    quoted,
                },
                Err(error) => QuoteState::Failed {
                    seq,
                    error: classify(&error),
                },
            };
            state.send_replace(next);
        });
    }

    /// Drop any pending request and clear the state.
    pub fn clear(&self) {
        self.seq.fetch_add(1, Ordering::AcqRel);
        self.state.send_replace(QuoteState::Empty);
    }
}
