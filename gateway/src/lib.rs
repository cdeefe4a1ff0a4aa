//! The consumed ledger boundary.
//!
//! # Architecture
//!
//! bondflow never talks to a ledger node directly. An external ledger-client
//! collaborator implements the three traits in this crate:
//!
//! - [`LedgerQueryGateway`] - read-only scripts returning untyped values
//! - [`LedgerMutationGateway`] - submit-then-await-seal mutations
//! - [`QuoteGateway`] - cross-asset price quotes for marketplace purchases
//!
//! The traits are object-safe so the engine takes `Arc<dyn ...>` and tests
//! substitute in-memory fakes. Requests are typed descriptors
//! ([`QueryRequest`], [`MutationRequest`]) with `serde_json` argument
//! payloads; the collaborator maps them onto whatever script/transaction
//! format its ledger speaks.
//!
//! # Error Handling
//!
//! Failures cross the boundary as [`GatewayError`], which carries the
//! collaborator's structured [`ErrorCode`] when one is available and the raw
//! message always. [`classify`](classify::classify) folds either into the
//! stable user-facing taxonomy.
//!
//! Mutations are not guaranteed idempotent, so nothing in this crate
//! retries. A submission that reaches [`LedgerMutationGateway::submit`]
//! either seals or surfaces exactly one error.

pub mod classify;

pub use classify::{ClassifiedError, ErrorKind, classify, classify_raw, classify_text};

use std::fmt;

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;

use bondflow_types::{Address, Amount, AssetId, BondId, StrategyId, TxId, YieldRate};

// ============================================================================
// Request descriptors
// ============================================================================

/// Read-only scripts the core issues against the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Does the account have the collection structure needed to hold bonds?
    HasCollection,
    /// Ids of all bonds in an account's personal collection.
    ListBondIds,
    /// Full record of one bond.
    GetBond,
    /// Listings in one seller's sale collection.
    GetSaleListings,
}

/// A read-only script plus its arguments.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub kind: QueryKind,
    pub args: Value,
}

impl QueryRequest {
    #[must_use]
    pub fn has_collection(address: &Address) -> Self {
        Self {
            kind: QueryKind::HasCollection,
            args: json!({ "address": address }),
        }
    }

    #[must_use]
    pub fn list_bond_ids(address: &Address) -> Self {
        Self {
            kind: QueryKind::ListBondIds,
            args: json!({ "address": address }),
        }
    }

    #[must_use]
    pub fn get_bond(address: &Address, id: BondId) -> Self {
        Self {
            kind: QueryKind::GetBond,
            args: json!({ "address": address, "id": id }),
        }
    }

    #[must_use]
    pub fn sale_listings(seller: &Address) -> Self {
        Self {
            kind: QueryKind::GetSaleListings,
            args: json!({ "seller": seller }),
        }
    }
}

/// State-changing transactions the core submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// One-time account provisioning so it can receive bonds.
    SetupAccount,
    MintBond,
    RedeemBond,
    /// Atomic redeem-and-remint with new terms.
    ReinvestBond,
    ListForSale,
    WithdrawListing,
    PurchaseListing,
}

/// How a marketplace purchase is paid.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payment {
    /// The listing's base asset at the listed price.
    Base,
    /// An alternate asset; `amount` comes from a [`QuoteGateway`] quote.
    Alternate { asset: AssetId, amount: Amount },
}

/// A mutation plus its arguments.
#[derive(Debug, Clone)]
pub struct MutationRequest {
    pub kind: MutationKind,
    pub args: Value,
}

impl MutationRequest {
    #[must_use]
    pub fn setup_account(address: &Address) -> Self {
        Self {
            kind: MutationKind::SetupAccount,
            args: json!({ "address": address }),
        }
    }

    #[must_use]
    pub fn mint_bond(
        address: &Address,
        strategy: &StrategyId,
        amount: Amount,
        lockup_secs: u64,
    ) -> Self {
        Self {
            kind: MutationKind::MintBond,
            args: json!({
                "address": address,
                "strategy": strategy,
                "amount": amount,
                "lockup_secs": lockup_secs,
            }),
        }
    }

    #[must_use]
    pub fn redeem_bond(address: &Address, id: BondId) -> Self {
        Self {
            kind: MutationKind::RedeemBond,
            args: json!({ "address": address, "id": id }),
        }
    }

    #[must_use]
    pub fn reinvest_bond(
        address: &Address,
        id: BondId,
        duration_secs: u64,
        yield_rate: YieldRate,
        strategy: &StrategyId,
    ) -> Self {
        Self {
            kind: MutationKind::ReinvestBond,
            args: json!({
                "address": address,
                "id": id,
                "duration_secs": duration_secs,
                "yield_rate": yield_rate,
                "strategy": strategy,
            }),
        }
    }

    #[must_use]
    pub fn list_for_sale(seller: &Address, id: BondId, price: Amount) -> Self {
        Self {
            kind: MutationKind::ListForSale,
            args: json!({ "seller": seller, "id": id, "price": price }),
        }
    }

    #[must_use]
    pub fn withdraw_listing(seller: &Address, id: BondId) -> Self {
        Self {
            kind: MutationKind::WithdrawListing,
            args: json!({ "seller": seller, "id": id }),
        }
    }

    #[must_use]
    pub fn purchase_listing(
        buyer: &Address,
        seller: &Address,
        id: BondId,
        payment: &Payment,
    ) -> Self {
        Self {
            kind: MutationKind::PurchaseListing,
            args: json!({
                "buyer": buyer,
                "seller": seller,
                "id": id,
                "payment": payment,
            }),
        }
    }
}

// ============================================================================
// Errors crossing the boundary
// ============================================================================

/// Structured failure code supplied by the ledger client when it can tell.
///
/// Preferred over substring matching; the classifier falls back to message
/// heuristics only when the collaborator reports no code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    UserRejected,
    InsufficientFunds,
    Network,
    SessionExpired,
    Configuration,
}

/// A failure as reported by the ledger client: optional structured code,
/// raw message always.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RawLedgerError {
    pub code: Option<ErrorCode>,
    pub message: String,
}

impl RawLedgerError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

/// Failure at the ledger boundary.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// A read-only script failed.
    #[error("ledger query failed: {0}")]
    Query(RawLedgerError),
    /// A mutation was rejected at submission time; nothing reached the chain.
    #[error("transaction submission failed: {0}")]
    Submit(RawLedgerError),
    /// A submitted mutation sealed with an error or never sealed.
    #[error("transaction {tx_id} failed: {message}")]
    Sealed { tx_id: TxId, message: String },
}

impl GatewayError {
    /// The correlation id, when the failure happened after submission.
    #[must_use]
    pub fn tx_id(&self) -> Option<&TxId> {
        match self {
            Self::Query(_) | Self::Submit(_) => None,
            Self::Sealed { tx_id, .. } => Some(tx_id),
        }
    }
}

/// Outcome of waiting for a submitted mutation to finalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealResult {
    pub sealed: bool,
    pub error_message: Option<String>,
}

impl SealResult {
    #[must_use]
    pub fn sealed() -> Self {
        Self {
            sealed: true,
            error_message: None,
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            sealed: true,
            error_message: Some(message.into()),
        }
    }
}

impl fmt::Display for SealResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error_message, self.sealed) {
            (Some(msg), _) => write!(f, "sealed with error: {msg}"),
            (None, true) => f.write_str("sealed"),
            (None, false) => f.write_str("not sealed"),
        }
    }
}

// ============================================================================
// Gateway traits
// ============================================================================

/// Read-only access to the ledger.
#[async_trait]
pub trait LedgerQueryGateway: Send + Sync {
    /// Execute a read-only script. `Value::Null` means "nothing there"
    /// (e.g. an account with no collection), not an error.
    async fn execute(&self, request: QueryRequest) -> Result<Value, GatewayError>;
}

/// Submit-then-await-seal access to the ledger.
#[async_trait]
pub trait LedgerMutationGateway: Send + Sync {
    /// Submit a mutation. Returns the correlation id on acceptance.
    async fn submit(&self, request: MutationRequest) -> Result<TxId, GatewayError>;

    /// Wait until the ledger reports a final result for `tx_id`.
    async fn await_seal(&self, tx_id: &TxId) -> Result<SealResult, GatewayError>;
}

/// Cross-asset pricing for marketplace purchases in an alternate asset.
#[async_trait]
pub trait QuoteGateway: Send + Sync {
    /// Amount of `payment_asset` needed to cover `base_amount` of the
    /// marketplace's base asset.
    async fn quote(
        &self,
        payment_asset: &AssetId,
        base_amount: Amount,
    ) -> Result<Amount, GatewayError>;
}

/// Submit a mutation and wait for its seal, folding an unsealed or
/// sealed-with-error outcome into [`GatewayError::Sealed`].
pub async fn submit_and_seal(
    gateway: &dyn LedgerMutationGateway,
    request: MutationRequest,
) -> Result<TxId, GatewayError> {
    let kind = request.kind;
    let tx_id = gateway.submit(request).await?;
    tracing::debug!(%tx_id, ?kind, "mutation submitted, awaiting seal");

    let seal = gateway.await_seal(&tx_id).await?;
    match seal.error_message {
        None if seal.sealed => Ok(tx_id),
        None => Err(GatewayError::Sealed {
            tx_id,
            message: "transaction was never sealed".to_string(),
        }),
        Some(message) => Err(GatewayError::Sealed { tx_id, message }),
    }
}
