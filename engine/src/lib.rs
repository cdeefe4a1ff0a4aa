//! Bond lifecycle orchestration engine.
//!
//! This crate sits between a UI layer and the abstract ledger boundary in
//! `bondflow-gateway`. It owns:
//!
//! - the per-operation transaction status machine ([`StatusSlot`])
//! - the account setup guard run before first mint ([`AccountSetupGuard`])
//! - concurrent bond/maturity queries ([`BondQueryService`])
//! - the mint, redemption, reinvestment, and marketplace coordinators
//! - the per-bond lock map preventing same-bond races ([`BondLocks`])
//! - the locally persisted reinvestment schedule ([`ReinvestStore`])
//! - the background refresh driver ([`RefreshTask`])
//!
//! Coordinators never mutate local views: after a mutation seals, the status
//! slot reports success and callers re-query through [`BondQueryService`].
//! There is therefore no optimistic state to reconcile when a mutation
//! ultimately fails. Coordinators also never retry - ledger mutations are
//! not guaranteed idempotent, and a duplicate submission is a worse outcome
//! than a surfaced error.

mod locks;
mod market;
mod mint;
mod query;
mod redeem;
mod refresh;
mod reinvest;
mod setup;
mod status;
mod store;

#[cfg(test)]
mod tests;

pub use locks::{BondGuard, BondLocks};
pub use market::{MarketplaceCoordinator, QUOTE_DEBOUNCE, QuoteState, QuoteTracker};
pub use mint::MintCoordinator;
pub use query::BondQueryService;
pub use redeem::{BatchOutcome, RedemptionCoordinator};
pub use refresh::{DEFAULT_REFRESH_INTERVAL, RefreshTask};
pub use reinvest::{AutoReinvestor, ReinvestmentCoordinator, SweepOutcome};
pub use setup::AccountSetupGuard;
pub use status::{ERROR_RESET, Phase, StatusBoard, StatusSlot, SUCCESS_RESET, TransactionStatus};
pub use store::ReinvestStore;

use std::sync::Arc;

use thiserror::Error;

use bondflow_gateway::{
    ClassifiedError, ErrorKind, GatewayError, LedgerMutationGateway, LedgerQueryGateway,
    QuoteGateway, classify,
};
use bondflow_types::{BondId, TxId};

/// Failure at the engine boundary.
///
/// Precondition variants are raised locally before any ledger contact;
/// `Gateway` wraps everything the remote boundary reported.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("bond {0} has not matured yet")]
    NotMatured(BondId),
    #[error("bond {0} was not found")]
    NotFound(BondId),
    #[error("listing price must be positive")]
    InvalidPrice,
    #[error("mint amount must be positive")]
    InvalidAmount,
    #[error("another operation is already running for bond {0}")]
    BondBusy(BondId),
    #[error("an operation of this type is already in flight")]
    InFlight,
    #[error("malformed ledger response: {0}")]
    Decode(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl EngineError {
    /// Fold this error into the user-facing taxonomy for a status banner.
    #[must_use]
    pub fn classified(&self) -> ClassifiedError {
        match self {
            Self::Gateway(e) => classify(e),
            Self::Decode(message) => ClassifiedError::new(ErrorKind::Unknown, message.clone()),
            other => ClassifiedError::precondition(other.to_string()),
        }
    }

    /// The correlation id, when the failure happened after submission.
    #[must_use]
    pub fn tx_id(&self) -> Option<&TxId> {
        match self {
            Self::Gateway(e) => e.tx_id(),
            _ => None,
        }
    }
}

/// Fully wired engine: one of each coordinator sharing the lock map and
/// the reinvestment store.
///
/// The UI layer holds one of these per connected account session and
/// subscribes to the status slots it cares about.
pub struct Engine {
    pub bonds: BondQueryService,
    pub setup: AccountSetupGuard,
    pub mint: MintCoordinator,
    pub redemption: RedemptionCoordinator,
    pub reinvestment: ReinvestmentCoordinator,
    pub marketplace: MarketplaceCoordinator,
    pub quotes: QuoteTracker,
    pub auto_reinvest: AutoReinvestor,
    pub store: Arc<ReinvestStore>,
}

impl Engine {
    #[must_use]
    pub fn new(
        queries: Arc<dyn LedgerQueryGateway>,
        mutations: Arc<dyn LedgerMutationGateway>,
        quote_gateway: Arc<dyn QuoteGateway>,
        store: ReinvestStore,
    ) -> Self {
        let locks = BondLocks::default();
        let store = Arc::new(store);
        let bonds = BondQueryService::new(Arc::clone(&queries));
        let reinvestment =
            ReinvestmentCoordinator::new(Arc::clone(&mutations), locks.clone());
        let auto_reinvest = AutoReinvestor::new(
            Arc::clone(&store),
            bonds.clone(),
            reinvestment.clone(),
        );

        Self {
            setup: AccountSetupGuard::new(Arc::clone(&queries), Arc::clone(&mutations)),
            mint: MintCoordinator::new(Arc::clone(&queries), Arc::clone(&mutations)),
            redemption: RedemptionCoordinator::new(Arc::clone(&mutations), locks.clone()),
            marketplace: MarketplaceCoordinator::new(queries, mutations, locks),
            quotes: QuoteTracker::new(quote_gateway),
            bonds,
            reinvestment,
            auto_reinvest,
            store,
        }
    }
}
