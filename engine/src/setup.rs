//! Account setup guard.
//!
//! An account can only receive bonds once it holds the required collection
//! structure. The guard probes for it and provisions it on demand; both
//! paths are safe to repeat (the probe no-ops when the structure exists).
//! Run as step one of every mint.

use std::sync::Arc;

use tracing::{debug, info};

use bondflow_gateway::{
    LedgerMutationGateway, LedgerQueryGateway, MutationRequest, QueryRequest, submit_and_seal,
};
use bondflow_types::{Address, TxId};

use crate::EngineError;

pub struct AccountSetupGuard {
    queries: Arc<dyn LedgerQueryGateway>,
    mutations: Arc<dyn LedgerMutationGateway>,
}

impl AccountSetupGuard {
    #[must_use]
    pub fn new(
        queries: Arc<dyn LedgerQueryGateway>,
        mutations: Arc<dyn LedgerMutationGateway>,
    ) -> Self {
        Self { queries, mutations }
    }

    /// Does `address` already have the structure required to hold bonds?
    pub async fn is_ready(&self, address: &Address) -> Result<bool, EngineError> {
        let value = self
            .queries
            .execute(QueryRequest::has_collection(address))
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Submit the one-time setup mutation and await its seal.
    pub async fn provision(&self, address: &Address) -> Result<TxId, EngineError> {
        let tx_id =
            submit_and_seal(self.mutations.as_ref(), MutationRequest::setup_account(address))
                .await?;
        info!(%address, %tx_id, "account provisioned for bond custody");
        Ok(tx_id)
    }

    /// Provision `address` unless it is already set up.
    ///
    /// Returns the setup transaction id when one was needed.
    pub async fn ensure_provisioned(&self, address: &Address) -> Result<Option<TxId>, EngineError> {
        if self.is_ready(address).await? {
            debug!(%address, "account already set up");
            return Ok(None);
        }
        self.provision(address).await.map(Some)
    }
}
