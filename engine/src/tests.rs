//! Integration tests for the engine against an in-memory fake ledger.
//!
//! `FakeLedger` implements all three gateway traits over a custody model
//! that mirrors the real one: per-account personal collections, per-seller
//! sale collections, and balances credited on redemption and purchase.
//! Failure injection is per bond id (submit) and global (seal), which is
//! enough to exercise every classification and batch-isolation path.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use bondflow_gateway::{
    ErrorKind, GatewayError, LedgerMutationGateway, LedgerQueryGateway, MutationKind,
    MutationRequest, Payment, QueryKind, QueryRequest, QuoteGateway, RawLedgerError, SealResult,
};
use bondflow_types::{
    Address, Amount, AssetId, Bond, BondId, MarketplaceListing, ReinvestmentConfig, StrategyId,
    Timestamp, TxId, YieldRate,
};

use crate::{
    Engine, EngineError, QuoteState, QuoteTracker, ReinvestStore, TransactionStatus,
};

const NOW: u64 = 1_700_000_000;

fn now() -> Timestamp {
    Timestamp::from_secs(NOW)
}

fn addr(s: &str) -> Address {
    Address::new(s).unwrap()
}

fn bond(id: u64, principal: i128, bps: u32, maturity: u64) -> Bond {
    Bond {
        id: BondId::new(id),
        principal: Amount::new(principal),
        yield_rate: YieldRate::from_bps(bps),
        strategy: StrategyId::new("stable-growth"),
        maturity_date: Timestamp::from_secs(maturity),
    }
}

fn reinvest_config(duration_secs: u64, bps: u32) -> ReinvestmentConfig {
    ReinvestmentConfig {
        new_duration_secs: duration_secs,
        new_yield_rate: YieldRate::from_bps(bps),
        new_strategy: StrategyId::new("stable-growth"),
    }
}

// ============================================================================
// FakeLedger
// ============================================================================

#[derive(Default)]
struct LedgerState {
    provisioned: HashSet<Address>,
    holdings: HashMap<Address, HashMap<BondId, Bond>>,
    sales: HashMap<Address, HashMap<BondId, (Bond, MarketplaceListing)>>,
    balances: HashMap<Address, i128>,
    next_bond_id: u64,
    next_tx: u64,
}

#[derive(Default)]
struct FakeLedger {
    state: Mutex<LedgerState>,
    submit_count: AtomicUsize,
    /// Bond ids whose mutations are rejected at submission time.
    failing_bonds: Mutex<HashSet<BondId>>,
    /// Bond ids whose queries fail.
    failing_queries: Mutex<HashSet<BondId>>,
    /// When set, the next seal reports this error message.
    seal_error: Mutex<Option<String>>,
    /// Artificial latency inside `submit`, for in-flight overlap tests.
    submit_delay: Duration,
}

impl FakeLedger {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_submit_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            submit_delay: delay,
            ..Self::default()
        })
    }

    fn seed_account(&self, address: &Address, bonds: Vec<Bond>) {
        let mut state = self.state.lock().unwrap();
        state.provisioned.insert(address.clone());
        for b in &bonds {
            state.next_bond_id = state.next_bond_id.max(b.id.value() + 1);
        }
        let holdings = state.holdings.entry(address.clone()).or_default();
        for b in bonds {
            holdings.insert(b.id, b);
        }
    }

    fn fail_bond(&self, id: BondId) {
        self.failing_bonds.lock().unwrap().insert(id);
    }

    fn clear_failing_bonds(&self) {
        self.failing_bonds.lock().unwrap().clear();
    }

    fn fail_query(&self, id: BondId) {
        self.failing_queries.lock().unwrap().insert(id);
    }

    fn fail_next_seal(&self, message: &str) {
        *self.seal_error.lock().unwrap() = Some(message.to_string());
    }

    fn submits(&self) -> usize {
        self.submit_count.load(Ordering::SeqCst)
    }

    fn holding(&self, address: &Address, id: BondId) -> Option<Bond> {
        self.state
            .lock()
            .unwrap()
            .holdings
            .get(address)
            .and_then(|h| h.get(&id))
            .cloned()
    }

    fn holdings_of(&self, address: &Address) -> Vec<Bond> {
        self.state
            .lock()
            .unwrap()
            .holdings
            .get(address)
            .map(|h| h.values().cloned().collect())
            .unwrap_or_default()
    }

    fn balance(&self, address: &Address) -> i128 {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    fn arg_address(args: &Value, key: &str) -> Address {
        addr(args[key].as_str().expect("address arg"))
    }

    fn arg_bond_id(args: &Value) -> BondId {
        BondId::new(args["id"].as_u64().expect("bond id arg"))
    }

    fn apply(&self, request: &MutationRequest) -> Result<(), RawLedgerError> {
        let args = &request.args;
        let mut state = self.state.lock().unwrap();
        match request.kind {
            MutationKind::SetupAccount => {
                let address = Self::arg_address(args, "address");
                state.provisioned.insert(address.clone());
                state.holdings.entry(address).or_default();
            }
            MutationKind::MintBond => {
                let address = Self::arg_address(args, "address");
                let amount: Amount = serde_json::from_value(args["amount"].clone()).unwrap();
                let lockup = args["lockup_secs"].as_u64().unwrap();
                let id = BondId::new(state.next_bond_id);
                state.next_bond_id += 1;
                let minted = Bond {
                    id,
                    principal: amount,
                    // The fake prices every strategy at a flat 5%.
                    yield_rate: YieldRate::from_bps(500),
                    strategy: StrategyId::new(args["strategy"].as_str().unwrap()),
                    maturity_date: Timestamp::from_secs(NOW + lockup),
                };
                state.holdings.entry(address).or_default().insert(id, minted);
            }
            MutationKind::RedeemBond => {
                let address = Self::arg_address(args, "address");
                let id = Self::arg_bond_id(args);
                let redeemed = state
                    .holdings
                    .get_mut(&address)
                    .and_then(|h| h.remove(&id))
                    .ok_or_else(|| RawLedgerError::new(format!("bond {id} not in collection")))?;
                let payout = redeemed
                    .principal
                    .saturating_add(redeemed.yield_rate.apply(redeemed.principal));
                *state.balances.entry(address).or_default() += payout.value();
            }
            MutationKind::ReinvestBond => {
                let address = Self::arg_address(args, "address");
                let id = Self::arg_bond_id(args);
                let duration = args["duration_secs"].as_u64().unwrap();
                let yield_rate: YieldRate =
                    serde_json::from_value(args["yield_rate"].clone()).unwrap();
                let old = state
                    .holdings
                    .get_mut(&address)
                    .and_then(|h| h.remove(&id))
                    .ok_or_else(|| RawLedgerError::new(format!("bond {id} not in collection")))?;
                let new_id = BondId::new(state.next_bond_id);
                state.next_bond_id += 1;
                let replacement = Bond {
                    id: new_id,
                    principal: old.principal,
                    yield_rate,
                    strategy: StrategyId::new(args["strategy"].as_str().unwrap()),
                    maturity_date: Timestamp::from_secs(NOW + duration),
                };
                state
                    .holdings
                    .entry(address)
                    .or_default()
                    .insert(new_id, replacement);
            }
            MutationKind::ListForSale => {
                let seller = Self::arg_address(args, "seller");
                let id = Self::arg_bond_id(args);
                let price: Amount = serde_json::from_value(args["price"].clone()).unwrap();
                let listed = state
                    .holdings
                    .get_mut(&seller)
                    .and_then(|h| h.remove(&id))
                    .ok_or_else(|| RawLedgerError::new(format!("bond {id} not in collection")))?;
                let listing = MarketplaceListing {
                    bond_id: id,
                    seller: seller.clone(),
                    price,
                    is_available: true,
                };
                state
                    .sales
                    .entry(seller)
                    .or_default()
                    .insert(id, (listed, listing));
            }
            MutationKind::WithdrawListing => {
                let seller = Self::arg_address(args, "seller");
                let id = Self::arg_bond_id(args);
                let (withdrawn, _) = state
                    .sales
                    .get_mut(&seller)
                    .and_then(|s| s.remove(&id))
                    .ok_or_else(|| RawLedgerError::new(format!("no listing for bond {id}")))?;
                state
                    .holdings
                    .entry(seller)
                    .or_default()
                    .insert(id, withdrawn);
            }
            MutationKind::PurchaseListing => {
                let buyer = Self::arg_address(args, "buyer");
                let seller = Self::arg_address(args, "seller");
                let id = Self::arg_bond_id(args);
                let (sold, listing) = state
                    .sales
                    .get_mut(&seller)
                    .and_then(|s| s.remove(&id))
                    .ok_or_else(|| RawLedgerError::new(format!("no listing for bond {id}")))?;
                *state.balances.entry(seller).or_default() += listing.price.value();
                state.holdings.entry(buyer).or_default().insert(id, sold);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerQueryGateway for FakeLedger {
    async fn execute(&self, request: QueryRequest) -> Result<Value, GatewayError> {
        let args = &request.args;
        let state = self.state.lock().unwrap();
        let value = match request.kind {
            QueryKind::HasCollection => {
                let address = Self::arg_address(args, "address");
                json!(state.provisioned.contains(&address))
            }
            QueryKind::ListBondIds => {
                let address = Self::arg_address(args, "address");
                match state.holdings.get(&address) {
                    None => Value::Null,
                    Some(holdings) => {
                        let mut ids: Vec<u64> = holdings.keys().map(|id| id.value()).collect();
                        ids.sort_unstable();
                        json!(ids)
                    }
                }
            }
            QueryKind::GetBond => {
                let address = Self::arg_address(args, "address");
                let id = Self::arg_bond_id(args);
                if self.failing_queries.lock().unwrap().contains(&id) {
                    return Err(GatewayError::Query(RawLedgerError::new(format!(
                        "script panic while reading bond {id}"
                    ))));
                }
                match state.holdings.get(&address).and_then(|h| h.get(&id)) {
                    None => Value::Null,
                    Some(b) => serde_json::to_value(b).unwrap(),
                }
            }
            QueryKind::GetSaleListings => {
                let seller = Self::arg_address(args, "seller");
                match state.sales.get(&seller) {
                    None => Value::Null,
                    Some(sales) => {
                        let listings: Vec<&MarketplaceListing> =
                            sales.values().map(|(_, l)| l).collect();
                        serde_json::to_value(listings).unwrap()
                    }
                }
            }
        };
        Ok(value)
    }
}

#[async_trait]
impl LedgerMutationGateway for FakeLedger {
    async fn submit(&self, request: MutationRequest) -> Result<TxId, GatewayError> {
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
        self.submit_count.fetch_add(1, Ordering::SeqCst);

        if let Some(id) = request.args.get("id").and_then(Value::as_u64) {
            if self.failing_bonds.lock().unwrap().contains(&BondId::new(id)) {
                return Err(GatewayError::Submit(RawLedgerError::new(format!(
                    "execution aborted for bond {id}"
                ))));
            }
        }

        self.apply(&request).map_err(GatewayError::Submit)?;
        let tx = {
            let mut state = self.state.lock().unwrap();
            state.next_tx += 1;
            TxId::new(format!("tx-{}", state.next_tx))
        };
        Ok(tx)
    }

    async fn await_seal(&self, _tx_id: &TxId) -> Result<SealResult, GatewayError> {
        match self.seal_error.lock().unwrap().take() {
            Some(message) => Ok(SealResult::failed(message)),
            None => Ok(SealResult::sealed()),
        }
    }
}

#[derive(Default)]
struct FakeQuotes {
    calls: AtomicUsize,
    delay: Duration,
    fail_message: Mutex<Option<String>>,
}

#[async_trait]
impl QuoteGateway for FakeQuotes {
    async fn quote(
        &self,
        _payment_asset: &AssetId,
        base_amount: Amount,
    ) -> Result<Amount, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(message) = self.fail_message.lock().unwrap().take() {
            return Err(GatewayError::Query(RawLedgerError::new(message)));
        }
        // Flat 2:1 rate keeps assertions obvious.
        Ok(Amount::new(base_amount.value() * 2))
    }
}

fn engine(ledger: &Arc<FakeLedger>) -> Engine {
    Engine::new(
        Arc::clone(ledger) as Arc<dyn LedgerQueryGateway>,
        Arc::clone(ledger) as Arc<dyn LedgerMutationGateway>,
        Arc::new(FakeQuotes::default()),
        ReinvestStore::in_memory(),
    )
}

// ============================================================================
// Mint
// ============================================================================

#[tokio::test]
async fn mint_provisions_unready_account_first() {
    let ledger = FakeLedger::new();
    let eng = engine(&ledger);
    let user = addr("0xaaa");

    eng.mint
        .mint(&user, &StrategyId::new("stable-growth"), Amount::new(1_000), 3_600)
        .await
        .unwrap();

    // Setup mutation plus mint mutation.
    assert_eq!(ledger.submits(), 2);
    let holdings = ledger.holdings_of(&user);
    assert_eq!(holdings.len(), 1);
    assert_eq!(holdings[0].principal, Amount::new(1_000));
    assert_eq!(holdings[0].maturity_date, Timestamp::from_secs(NOW + 3_600));
    assert!(matches!(
        eng.mint.status().current(),
        TransactionStatus::Success { .. }
    ));
}

#[tokio::test]
async fn mint_skips_setup_for_ready_account() {
    let ledger = FakeLedger::new();
    let user = addr("0xaaa");
    ledger.seed_account(&user, vec![]);
    let eng = engine(&ledger);

    eng.mint
        .mint(&user, &StrategyId::new("stable-growth"), Amount::new(500), 60)
        .await
        .unwrap();

    assert_eq!(ledger.submits(), 1);
}

#[tokio::test]
async fn mint_rejects_non_positive_amount_locally() {
    let ledger = FakeLedger::new();
    let eng = engine(&ledger);

    let err = eng
        .mint
        .mint(&addr("0xaaa"), &StrategyId::new("s"), Amount::ZERO, 60)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::InvalidAmount));
    assert_eq!(ledger.submits(), 0);
    match eng.mint.status().current() {
        TransactionStatus::Failed { error, tx_id } => {
            assert_eq!(error.kind, ErrorKind::Precondition);
            assert!(tx_id.is_none());
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_mints_share_one_slot() {
    let ledger = FakeLedger::with_submit_delay(Duration::from_secs(10));
    let user = addr("0xaaa");
    ledger.seed_account(&user, vec![]);
    let eng = Arc::new(engine(&ledger));

    let first = {
        let eng = Arc::clone(&eng);
        let user = user.clone();
        tokio::spawn(async move {
            eng.mint
                .mint(&user, &StrategyId::new("s"), Amount::new(100), 60)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;

    // Second click while the first is awaiting its seal.
    let err = eng
        .mint
        .mint(&user, &StrategyId::new("s"), Amount::new(100), 60)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InFlight));

    first.await.unwrap().unwrap();
    assert_eq!(ledger.holdings_of(&user).len(), 1);
}

#[tokio::test]
async fn seal_failure_surfaces_classified_error_with_tx_id() {
    let ledger = FakeLedger::new();
    let user = addr("0xaaa");
    ledger.seed_account(&user, vec![]);
    ledger.fail_next_seal("insufficient vault balance");
    let eng = engine(&ledger);

    let err = eng
        .mint
        .mint(&user, &StrategyId::new("s"), Amount::new(100), 60)
        .await
        .unwrap_err();

    assert!(err.tx_id().is_some());
    match eng.mint.status().current() {
        TransactionStatus::Failed { error, tx_id } => {
            assert_eq!(error.kind, ErrorKind::InsufficientFunds);
            assert!(tx_id.is_some());
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

// ============================================================================
// Queries
// ============================================================================

#[tokio::test]
async fn unprovisioned_account_lists_no_bonds() {
    let ledger = FakeLedger::new();
    let eng = engine(&ledger);
    let ids = eng.bonds.list_bond_ids(&addr("0xnew")).await.unwrap();
    assert!(ids.is_empty());
}

#[tokio::test]
async fn missing_bond_is_not_found() {
    let ledger = FakeLedger::new();
    let user = addr("0xaaa");
    ledger.seed_account(&user, vec![]);
    let eng = engine(&ledger);

    let err = eng.bonds.get_bond(&user, BondId::new(42)).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(id) if id == BondId::new(42)));
}

#[tokio::test]
async fn maturity_batch_drops_failing_bonds() {
    let ledger = FakeLedger::new();
    let user = addr("0xaaa");
    ledger.seed_account(
        &user,
        vec![
            bond(1, 100, 500, NOW - 10),
            bond(2, 200, 500, NOW + 10),
            bond(3, 300, 500, NOW + 20),
        ],
    );
    ledger.fail_query(BondId::new(2));
    let eng = engine(&ledger);

    let views = eng.bonds.get_all_maturities(&user, now()).await.unwrap();
    let mut ids: Vec<u64> = views.iter().map(|v| v.bond.id.value()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 3]);
}

#[tokio::test]
async fn redeemable_nearing_and_total_filters() {
    let ledger = FakeLedger::new();
    let user = addr("0xaaa");
    ledger.seed_account(
        &user,
        vec![
            // matured: 100 + 5% = 105
            bond(1, 100, 500, NOW - 1),
            // matured: 1000 + 8% = 1080
            bond(2, 1_000, 800, NOW),
            // 30 minutes out
            bond(3, 500, 500, NOW + 1_800),
            // 2 hours out
            bond(4, 500, 500, NOW + 7_200),
        ],
    );
    let eng = engine(&ledger);

    let redeemable = eng.bonds.get_redeemable(&user, now()).await.unwrap();
    assert_eq!(redeemable.len(), 2);

    let nearing = eng.bonds.get_nearing_maturity(&user, 1, now()).await.unwrap();
    assert_eq!(nearing.len(), 1);
    assert_eq!(nearing[0].bond.id, BondId::new(3));

    let total = eng.bonds.get_total_redeemable_value(&user, now()).await.unwrap();
    assert_eq!(total, Amount::new(105 + 1_080));
}

// ============================================================================
// Redemption
// ============================================================================

#[tokio::test]
async fn unmatured_redemption_never_reaches_the_ledger() {
    let ledger = FakeLedger::new();
    let user = addr("0xaaa");
    let pending = bond(7, 100, 500, NOW + 1_000);
    ledger.seed_account(&user, vec![pending.clone()]);
    let eng = engine(&ledger);

    let err = eng
        .redemption
        .redeem_one(&user, &pending, now())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::NotMatured(id) if id == BondId::new(7)));
    assert_eq!(ledger.submits(), 0);
}

#[tokio::test]
async fn redemption_credits_principal_plus_yield() {
    let ledger = FakeLedger::new();
    let user = addr("0xaaa");
    let matured = bond(7, 10_000, 800, NOW - 1);
    ledger.seed_account(&user, vec![matured.clone()]);
    let eng = engine(&ledger);

    eng.redemption.redeem_one(&user, &matured, now()).await.unwrap();

    assert!(ledger.holding(&user, BondId::new(7)).is_none());
    assert_eq!(ledger.balance(&user), 10_800);
    assert!(matches!(
        eng.redemption.status(BondId::new(7)).current(),
        TransactionStatus::Success { .. }
    ));
}

#[tokio::test]
async fn batch_redemption_counts_and_isolates_failures() {
    let ledger = FakeLedger::new();
    let user = addr("0xaaa");
    let bonds: Vec<Bond> = (1..=3).map(|i| bond(i, 100, 500, NOW - 1)).collect();
    ledger.seed_account(&user, bonds.clone());
    ledger.fail_bond(BondId::new(2));
    let eng = engine(&ledger);

    let outcome = eng.redemption.redeem_all(&user, &bonds, now()).await;
    assert_eq!(outcome.succeeded, 2);
    assert_eq!(outcome.failed, 1);

    // The failed bond is untouched and independently redeemable afterward.
    let survivor = ledger.holding(&user, BondId::new(2)).unwrap();
    ledger.clear_failing_bonds();
    eng.redemption.redeem_one(&user, &survivor, now()).await.unwrap();
    assert!(ledger.holding(&user, BondId::new(2)).is_none());
}

// ============================================================================
// Reinvestment
// ============================================================================

#[tokio::test]
async fn reinvestment_replaces_bond_with_same_principal() {
    let ledger = FakeLedger::new();
    let user = addr("0xaaa");
    let old = bond(3, 500, 800, NOW - 1);
    ledger.seed_account(&user, vec![old.clone()]);
    let eng = engine(&ledger);

    eng.reinvestment
        .reinvest(&user, &old, &reinvest_config(2_592_000, 500), now())
        .await
        .unwrap();

    assert!(ledger.holding(&user, BondId::new(3)).is_none());
    let holdings = ledger.holdings_of(&user);
    assert_eq!(holdings.len(), 1);
    let replacement = &holdings[0];
    assert_ne!(replacement.id, old.id);
    assert_eq!(replacement.principal, Amount::new(500));
    assert_eq!(replacement.yield_rate, YieldRate::from_bps(500));
    assert_eq!(
        replacement.maturity_date,
        Timestamp::from_secs(NOW + 2_592_000)
    );
}

#[tokio::test]
async fn early_reinvestment_is_permitted() {
    let ledger = FakeLedger::new();
    let user = addr("0xaaa");
    let pending = bond(3, 500, 800, NOW + 10_000);
    ledger.seed_account(&user, vec![pending.clone()]);
    let eng = engine(&ledger);

    // Discarding the remaining lock-up is the holder's call; it only warns.
    eng.reinvestment
        .reinvest(&user, &pending, &reinvest_config(60, 100), now())
        .await
        .unwrap();
    assert_eq!(ledger.holdings_of(&user).len(), 1);
}

#[tokio::test]
async fn sweep_executes_matured_configs_only() {
    let ledger = FakeLedger::new();
    let user = addr("0xaaa");
    ledger.seed_account(
        &user,
        vec![bond(1, 500, 500, NOW - 1), bond(2, 700, 500, NOW + 9_999)],
    );
    let eng = engine(&ledger);
    eng.store.schedule(BondId::new(1), reinvest_config(2_592_000, 500));
    eng.store.schedule(BondId::new(2), reinvest_config(2_592_000, 500));

    let outcome = eng.auto_reinvest.sweep(&user, now()).await;
    assert_eq!(outcome.executed, 1);
    assert_eq!(outcome.waiting, 1);
    assert_eq!(outcome.failed, 0);

    // Executed config removed, waiting config kept.
    assert!(eng.store.get(BondId::new(1)).is_none());
    assert!(eng.store.get(BondId::new(2)).is_some());
    assert!(ledger.holding(&user, BondId::new(1)).is_none());
}

#[tokio::test]
async fn sweep_drops_configs_for_missing_bonds() {
    let ledger = FakeLedger::new();
    let user = addr("0xaaa");
    ledger.seed_account(&user, vec![]);
    let eng = engine(&ledger);
    eng.store.schedule(BondId::new(99), reinvest_config(60, 100));

    let outcome = eng.auto_reinvest.sweep(&user, now()).await;
    assert_eq!(outcome, crate::SweepOutcome::default());
    assert!(eng.store.is_empty());
}

#[tokio::test]
async fn failed_sweep_keeps_config_for_retry() {
    let ledger = FakeLedger::new();
    let user = addr("0xaaa");
    ledger.seed_account(&user, vec![bond(1, 500, 500, NOW - 1)]);
    ledger.fail_bond(BondId::new(1));
    let eng = engine(&ledger);
    eng.store.schedule(BondId::new(1), reinvest_config(60, 100));

    let outcome = eng.auto_reinvest.sweep(&user, now()).await;
    assert_eq!(outcome.failed, 1);
    assert!(eng.store.get(BondId::new(1)).is_some());

    // Next cycle succeeds once the ledger recovers.
    ledger.clear_failing_bonds();
    let outcome = eng.auto_reinvest.sweep(&user, now()).await;
    assert_eq!(outcome.executed, 1);
    assert!(eng.store.is_empty());
}

// ============================================================================
// Marketplace
// ============================================================================

#[tokio::test]
async fn list_then_withdraw_round_trips_custody() {
    let ledger = FakeLedger::new();
    let seller = addr("0xseller");
    let original = bond(7, 1_000, 800, NOW + 500);
    ledger.seed_account(&seller, vec![original.clone()]);
    let eng = engine(&ledger);

    eng.marketplace
        .list_for_sale(&seller, &original, Amount::new(120))
        .await
        .unwrap();
    assert!(ledger.holding(&seller, BondId::new(7)).is_none());

    let listings = eng.marketplace.get_listings(std::slice::from_ref(&seller)).await;
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].price, Amount::new(120));

    eng.marketplace.withdraw(&listings[0]).await.unwrap();

    // Custody restored with every field unchanged.
    assert_eq!(ledger.holding(&seller, BondId::new(7)), Some(original));
    assert!(eng.marketplace.get_listings(&[seller]).await.is_empty());
}

#[tokio::test]
async fn listing_rejects_non_positive_price_locally() {
    let ledger = FakeLedger::new();
    let seller = addr("0xseller");
    let b = bond(7, 1_000, 800, NOW + 500);
    ledger.seed_account(&seller, vec![b.clone()]);
    let eng = engine(&ledger);

    let err = eng
        .marketplace
        .list_for_sale(&seller, &b, Amount::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidPrice));
    assert_eq!(ledger.submits(), 0);
}

#[tokio::test]
async fn purchase_moves_custody_and_pays_seller() {
    let ledger = FakeLedger::new();
    let seller = addr("0xseller");
    let buyer = addr("0xbuyer");
    let b = bond(7, 1_000, 800, NOW + 500);
    ledger.seed_account(&seller, vec![b.clone()]);
    ledger.seed_account(&buyer, vec![]);
    let eng = engine(&ledger);

    eng.marketplace
        .list_for_sale(&seller, &b, Amount::new(120))
        .await
        .unwrap();
    let listings = eng.marketplace.get_listings(std::slice::from_ref(&seller)).await;

    eng.marketplace
        .purchase(&buyer, &listings[0], &Payment::Base)
        .await
        .unwrap();

    assert!(eng.marketplace.get_listings(&[seller.clone()]).await.is_empty());
    assert!(ledger.holding(&buyer, BondId::new(7)).is_some());
    assert_eq!(ledger.balance(&seller), 120);
}

#[tokio::test(start_paused = true)]
async fn same_bond_operations_cannot_race() {
    let ledger = FakeLedger::with_submit_delay(Duration::from_secs(10));
    let user = addr("0xaaa");
    let matured = bond(7, 1_000, 800, NOW - 1);
    ledger.seed_account(&user, vec![matured.clone()]);
    let eng = Arc::new(engine(&ledger));

    let redemption = {
        let eng = Arc::clone(&eng);
        let user = user.clone();
        let matured = matured.clone();
        tokio::spawn(async move { eng.redemption.redeem_one(&user, &matured, now()).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;

    // Listing the same bond while its redemption is in flight.
    let err = eng
        .marketplace
        .list_for_sale(&user, &matured, Amount::new(50))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BondBusy(id) if id == BondId::new(7)));

    redemption.await.unwrap().unwrap();
}

// ============================================================================
// Quotes
// ============================================================================

#[tokio::test(start_paused = true)]
async fn only_the_latest_quote_request_lands() {
    let quotes = Arc::new(FakeQuotes {
        delay: Duration::from_secs(1),
        ..FakeQuotes::default()
    });
    let tracker = QuoteTracker::new(Arc::clone(&quotes) as Arc<dyn QuoteGateway>);

    tracker.request(AssetId::new("ALT"), Amount::new(100));
    // Second request inside the debounce window supersedes the first.
    tokio::time::sleep(Duration::from_millis(100)).await;
    tracker.request(AssetId::new("ALT"), Amount::new(200));

    tokio::time::sleep(Duration::from_secs(3)).await;
    match tracker.current() {
        QuoteState::Ready {
            base_amount, quoted, ..
        } => {
            assert_eq!(base_amount, Amount::new(200));
            assert_eq!(quoted, Amount::new(400));
        }
        other => panic!("expected Ready, got {other:?}"),
    }
    // The superseded request never reached the gateway.
    assert_eq!(quotes.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn quote_failures_are_classified() {
    let quotes = Arc::new(FakeQuotes::default());
    *quotes.fail_message.lock().unwrap() = Some("connection reset by peer".to_string());
    let tracker = QuoteTracker::new(Arc::clone(&quotes) as Arc<dyn QuoteGateway>);

    tracker.request(AssetId::new("ALT"), Amount::new(100));
    tokio::time::sleep(Duration::from_secs(1)).await;

    match tracker.current() {
        QuoteState::Failed { error, .. } => assert_eq!(error.kind, ErrorKind::Network),
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn cleared_tracker_discards_in_flight_quote() {
    let quotes = Arc::new(FakeQuotes {
        delay: Duration::from_secs(1),
        ..FakeQuotes::default()
    });
    let tracker = QuoteTracker::new(Arc::clone(&quotes) as Arc<dyn QuoteGateway>);

    tracker.request(AssetId::new("ALT"), Amount::new(100));
    tokio::time::sleep(Duration::from_millis(400)).await;
    tracker.clear();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(tracker.current(), QuoteState::Empty);
}
