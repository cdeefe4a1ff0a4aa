//! Bond and maturity queries.
//!
//! Read-only views over an account's bond collection. Batch queries fan
//! out concurrently and follow a lossy-but-available policy: one bond's
//! query failing drops that bond from the result (with a warning) instead
//! of failing the whole view. A holdings screen with nine of ten bonds
//! beats an error page.

use std::sync::Arc;

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use bondflow_gateway::{LedgerQueryGateway, QueryRequest};
use bondflow_types::maturity::{MaturityView, compute_maturity};
use bondflow_types::{Address, Amount, Bond, BondId, Timestamp};

use crate::EngineError;

pub(crate) fn decode<T: DeserializeOwned>(value: Value) -> Result<T, EngineError> {
    serde_json::from_value(value).map_err(|e| EngineError::Decode(e.to_string()))
}

#[derive(Clone)]
pub struct BondQueryService {
    queries: Arc<dyn LedgerQueryGateway>,
}

impl BondQueryService {
    #[must_use]
    pub fn new(queries: Arc<dyn LedgerQueryGateway>) -> Self {
        Self { queries }
    }

    /// Ids of all bonds in `address`'s personal collection.
    ///
    /// An account with no collection yet yields an empty list, not an error.
    pub async fn list_bond_ids(&self, address: &Address) -> Result<Vec<BondId>, EngineError> {
        let value = self
            .queries
            .execute(QueryRequest::list_bond_ids(address))
            .await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        decode(value)
    }

    /// The full record of one bond.
    pub async fn get_bond(&self, address: &Address, id: BondId) -> Result<Bond, EngineError> {
        let value = self
            .queries
            .execute(QueryRequest::get_bond(address, id))
            .await?;
        if value.is_null() {
            return Err(EngineError::NotFound(id));
        }
        decode(value)
    }

    /// One bond with its maturity facts as of `now`.
    pub async fn get_maturity(
        &self,
        address: &Address,
        id: BondId,
        now: Timestamp,
    ) -> Result<MaturityView, EngineError> {
        let bond = self.get_bond(address, id).await?;
        let maturity = compute_maturity(&bond, now);
        Ok(MaturityView { bond, maturity })
    }

    /// Maturity facts for every bond in the collection, queried
    /// concurrently. Individual failures are dropped from the result.
    pub async fn get_all_maturities(
        &self,
        address: &Address,
        now: Timestamp,
    ) -> Result<Vec<MaturityView>, EngineError> {
        let ids = self.list_bond_ids(address).await?;
        let results = join_all(
            ids.iter()
                .map(|&id| self.get_maturity(address, id, now)),
        )
        .await;

        Ok(ids
            .into_iter()
            .zip(results)
            .filter_map(|(id, result)| match result {
                Ok(view) => Some(view),
                Err(error) => {
                    warn!(bond = %id, %error, "dropping bond from maturity batch");
                    None
                }
            })
            .collect())
    }

    /// Bonds that have reached maturity and can be redeemed.
    pub async fn get_redeemable(
        &self,
        address: &Address,
        now: Timestamp,
    ) -> Result<Vec<MaturityView>, EngineError> {
        let mut views = self.get_all_maturities(address, now).await?;
        views.retain(|v| v.maturity.is_matured);
        Ok(views)
    }

    /// Unmatured bonds maturing within `hours_threshold` hours.
    pub async fn get_nearing_maturity(
        &self,
        address: &Address,
        hours_threshold: u64,
        now: Timestamp,
    ) -> Result<Vec<MaturityView>, EngineError> {
        let cutoff_secs = hours_threshold.saturating_mul(3_600);
        let mut views = self.get_all_maturities(address, now).await?;
        views.retain(|v| !v.maturity.is_matured && v.maturity.time_until_maturity <= cutoff_secs);
        Ok(views)
    }

    /// Sum of `expected_total` over every redeemable bond.
    pub async fn get_total_redeemable_value(
        &self,
        address: &Address,
        now: Timestamp,
    ) -> Result<Amount, EngineError> {
        let redeemable = self.get_redeemable(address, now).await?;
        Ok(redeemable.iter().map(|v| v.maturity.expected_total).sum())
    }
}
