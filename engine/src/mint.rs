//! Mint coordination.
//!
//! Minting is the one multi-step flow: the account may need its one-time
//! setup first. The status slot walks `Checking -> Setup -> Minting` so the
//! UI can narrate each step; `Setup` is skipped for accounts that already
//! hold a collection.
//!
//! No local bond list is updated here. Callers observe `Success` on the
//! status slot and re-query through `BondQueryService`.

use std::sync::Arc;

use tracing::info;

use bondflow_gateway::{
    LedgerMutationGateway, LedgerQueryGateway, MutationRequest, submit_and_seal,
};
use bondflow_types::{Address, Amount, StrategyId, TxId};

use crate::setup::AccountSetupGuard;
use crate::status::{Phase, StatusSlot};
use crate::EngineError;

pub struct MintCoordinator {
    setup: AccountSetupGuard,
    mutations: Arc<dyn LedgerMutationGateway>,
    status: StatusSlot,
}

impl MintCoordinator {
    #[must_use]
    pub fn new(
        queries: Arc<dyn LedgerQueryGateway>,
        mutations: Arc<dyn LedgerMutationGateway>,
    ) -> Self {
        Self {
            setup: AccountSetupGuard::new(queries, Arc::clone(&mutations)),
            mutations,
            status: StatusSlot::new(),
        }
    }

    /// The status slot all mints on this coordinator report through.
    #[must_use]
    pub fn status(&self) -> &StatusSlot {
        &self.status
    }

    /// Mint a bond: ensure the account is set up, then submit the mint and
    /// await its seal.
    pub async fn mint(
        &self,
        address: &Address,
        strategy: &StrategyId,
        amount: Amount,
        lockup_secs: u64,
    ) -> Result<TxId, EngineError> {
        self.status.begin(Phase::Checking)?;
        match self.mint_inner(address, strategy, amount, lockup_secs).await {
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

    async fn mint_inner(
        &self,
        address: &Address,
        strategy: &StrategyId,
        amount: Amount,
        lockup_secs: u64,
    ) -> Result<TxId, EngineError> {
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount);
        }

        if !self.setup.is_ready(address).await? {
            self.status.advance(Phase::Setup);
            self.setup.provision(address).await?;
        }

        self.status.advance(Phase::Minting);
        let tx_id = submit_and_seal(
            self.mutations.as_ref(),
            MutationRequest::mint_bond(address, strategy, amount, lockup_secs),
        )
        .await?;
        info!(%address, %strategy, %amount, lockup_secs, %tx_id, "bond minted");
        Ok(tx_id)
    }
}
