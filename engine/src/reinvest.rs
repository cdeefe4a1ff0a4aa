//! Reinvestment coordination.
//!
//! A reinvestment is one atomic ledger mutation: the old bond is withdrawn
//! and a replacement minted with the same principal under new terms. The
//! two halves cannot be observed separately; either both happen or neither.
//!
//! Reinvesting before maturity is permitted - it discards the remaining
//! lock-up, which is the holder's call to make - but it is logged loudly.
//!
//! The scheduled variant stores a [`ReinvestmentConfig`] per bond and lets
//! the refresh cycle call [`AutoReinvestor::sweep`], which executes every
//! bond that has both matured and kept its config, deleting the config on
//! success and leaving it for retry on failure.

use std::sync::Arc;

use tracing::{info, warn};

use bondflow_gateway::{LedgerMutationGateway, MutationRequest, submit_and_seal};
use bondflow_types::maturity::compute_maturity;
use bondflow_types::{Address, Bond, ReinvestmentConfig, Timestamp, TxId};

use crate::locks::BondLocks;
use crate::query::BondQueryService;
use crate::status::{Phase, StatusSlot};
use crate::store::ReinvestStore;
use crate::EngineError;

#[derive(Clone)]
pub struct ReinvestmentCoordinator {
    mutations: Arc<dyn LedgerMutationGateway>,
    status: StatusSlot,
    locks: BondLocks,
}

impl ReinvestmentCoordinator {
    #[must_use]
    pub fn new(mutations: Arc<dyn LedgerMutationGateway>, locks: BondLocks) -> Self {
        Self {
            mutations,
            status: StatusSlot::new(),
            locks,
        }
    }

    #[must_use]
    pub fn status(&self) -> &StatusSlot {
        &self.status
    }

    /// Atomically roll `bond` over into a replacement with the same
    /// principal and the terms in `config`.
    pub async fn reinvest(
        &self,
        address: &Address,
        bond: &Bond,
        config: &ReinvestmentConfig,
        now: Timestamp,
    ) -> Result<TxId, EngineError> {
        self.status.begin(Phase::Reinvesting)?;
        match self.reinvest_inner(address, bond, config, now).await {
            Ok(tx_id) => {
                self.status.succeed(tx_id.clone());
                Ok(tx_id)
            }
            Err(error) => {
                self.status.fail(error.classified(), error.tx_id().cloned());
                Err(error)
            }
        }
    }

    async fn reinvest_inner(
        &self,
        address: &Address,
        bond: &Bond,
        config: &ReinvestmentConfig,
        now: Timestamp,
    ) -> Result<TxId, EngineError> {
        let _guard = self.locks.acquire(bond.id)?;

        let maturity = compute_maturity(bond, now);
        if !maturity.is_matured {
            warn!(
                bond = %bond.id,
                remaining_secs = maturity.time_until_maturity,
                "reinvesting before maturity discards the remaining lock-up"
            );
        }

        let tx_id = submit_and_seal(
            self.mutations.as_ref(),
            MutationRequest::reinvest_bond(
                address,
                bond.id,
                config.new_duration_secs,
                config.new_yield_rate,
                &config.new_strategy,
            ),
        )
        .await?;
        info!(
            bond = %bond.id,
            principal = %bond.principal,
            new_duration_secs = config.new_duration_secs,
            new_yield_rate = %config.new_yield_rate,
            %tx_id,
            "bond reinvested"
        );
        Ok(tx_id)
    }
}

/// Aggregate result of one auto-reinvestment sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Configs executed and removed.
    pub executed: u32,
    /// Attempts that failed; their configs are kept for the next cycle.
    pub failed: u32,
    /// Configs whose bonds have not matured yet.
    pub waiting: u32,
}

/// Executes scheduled reinvestments as bonds mature.
#[derive(Clone)]
pub struct AutoReinvestor {
    store: Arc<ReinvestStore>,
    bonds: BondQueryService,
    coordinator: ReinvestmentCoordinator,
}

impl AutoReinvestor {
    #[must_use]
    pub fn new(
        store: Arc<ReinvestStore>,
        bonds: BondQueryService,
        coordinator: ReinvestmentCoordinator,
    ) -> Self {
        Self {
            store,
            bonds,
            coordinator,
        }
    }

    /// Run one sweep over the stored configs.
    ///
    /// Bonds are handled one at a time: each reinvestment goes through the
    /// shared coordinator (and its status slot), so a manual reinvestment
    /// in flight simply pushes the sweep's bonds to the next cycle.
    pub async fn sweep(&self, address: &Address, now: Timestamp) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        for (id, config) in self.store.snapshot() {
            let bond = match self.bonds.get_bond(address, id).await {
                Ok(bond) => bond,
                Err(EngineError::NotFound(_)) => {
                    // Redeemed or sold since scheduling; the config is moot.
                    warn!(bond = %id, "scheduled bond no longer exists, dropping config");
                    self.store.cancel(id);
                    continue;
                }
                Err(error) => {
                    warn!(bond = %id, %error, "could not check scheduled bond, will retry");
                    outcome.failed += 1;
                    continue;
                }
            };

            if !compute_maturity(&bond, now).is_matured {
                outcome.waiting += 1;
                continue;
            }

            match self.coordinator.reinvest(address, &bond, &config, now).await {
                Ok(_) => {
                    self.store.cancel(id);
                    outcome.executed += 1;
                }
                Err(error) => {
                    warn!(bond = %id, %error, "scheduled reinvestment failed, will retry");
                    outcome.failed += 1;
                }
            }
        }

        if outcome != SweepOutcome::default() {
            info!(
                executed = outcome.executed,
                failed = outcome.failed,
                waiting = outcome.waiting,
                "auto-reinvestment sweep finished"
            );
        }
        outcome
    }
}
