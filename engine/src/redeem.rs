//! Redemption coordination.
//!
//! Single redemptions report through a per-bond status slot. Batch
//! redemption fans out concurrently and reports an aggregate count instead
//! of a shared status: there is no partial rollback, and one bond's
//! failure never aborts its siblings - a failed bond simply stays
//! redeemable for the next attempt.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{info, warn};

use bondflow_gateway::{LedgerMutationGateway, MutationRequest, submit_and_seal};
use bondflow_types::maturity::compute_maturity;
use bondflow_types::{Address, Bond, BondId, Timestamp, TxId};

use crate::locks::BondLocks;
use crate::status::{Phase, StatusBoard, StatusSlot};
use crate::EngineError;

/// Aggregate result of a batch redemption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: u32,
    pub failed: u32,
}

#[derive(Clone)]
pub struct RedemptionCoordinator {
    mutations: Arc<dyn LedgerMutationGateway>,
    statuses: StatusBoard,
    locks: BondLocks,
}

impl RedemptionCoordinator {
    #[must_use]
    pub fn new(mutations: Arc<dyn LedgerMutationGateway>, locks: BondLocks) -> Self {
        Self {
            mutations,
            statuses: StatusBoard::new(),
            locks,
        }
    }

    /// The status slot for one bond's redemption.
    #[must_use]
    pub fn status(&self, id: BondId) -> StatusSlot {
        self.statuses.slot(id)
    }

    /// Redeem one matured bond.
    ///
    /// An unmatured bond fails with [`EngineError::NotMatured`] before any
    /// ledger contact.
    pub async fn redeem_one(
        &self,
        address: &Address,
        bond: &Bond,
        now: Timestamp,
    ) -> Result<TxId, EngineError> {
        if !compute_maturity(bond, now).is_matured {
            return Err(EngineError::NotMatured(bond.id));
        }

        let slot = self.statuses.slot(bond.id);
        slot.begin(Phase::Redeeming)?;
        match self.redeem_inner(address, bond.id).await {
            Ok(tx_id) => {
                slot.succeed(tx_id.clone());
                Ok(tx_id)
            }
            Err(error) => {
                slot.fail(error.classified(), error.tx_id().cloned());
                Err(error)
            }
        }
    }

    async fn redeem_inner(&self, address: &Address, id: BondId) -> Result<TxId, EngineError> {
        let _guard = self.locks.acquire(id)?;
        let tx_id = submit_and_seal(
            self.mutations.as_ref(),
            MutationRequest::redeem_bond(address, id),
        )
        .await?;
        info!(bond = %id, %tx_id, "bond redeemed");
        Ok(tx_id)
    }

    /// Redeem every given (already matured) bond concurrently.
    ///
    /// No shared status instance and no rollback: the outcome is the count
    /// of bonds that sealed and the count that failed.
    pub async fn redeem_all(
        &self,
        address: &Address,
        bonds: &[Bond],
        now: Timestamp,
    ) -> BatchOutcome {
        let results = join_all(
            bonds
                .iter()
                .map(|bond| self.redeem_one(address, bond, now)),
        )
        .await;

        let mut outcome = BatchOutcome::default();
        for (bond, result) in bonds.iter().zip(results) {
            match result {
                Ok(_) => outcome.succeeded += 1,
                Err(error) => {
                    warn!(bond = %bond.id, %error, "redemption failed within batch");
                    outcome.failed += 1;
                }
            }
        }
        info!(
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "batch redemption finished"
        );
        outcome
    }
}
