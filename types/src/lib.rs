//! Core domain types for bondflow.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the
//! application.
//!
//! Monetary amounts are integer fixed-point ([`Amount`]) and yield rates are
//! basis points ([`YieldRate`]), so derived values stay exact and
//! non-finite arithmetic is unrepresentable. Time is epoch seconds
//! ([`Timestamp`]) with saturating subtraction.

mod ids;
pub mod maturity;

pub use ids::{Address, AddressError, AssetId, BondId, StrategyId, TxId};

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Amount - fixed-point monetary value
// ============================================================================

/// A monetary amount in the ledger's smallest unit.
///
/// Sums saturate rather than wrap; a portfolio total that hits `i128::MAX`
/// is already meaningless, but it must never panic in a view refresh.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i128);

impl Amount {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn new(value: i128) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn value(self) -> i128 {
        self.0
    }

    #[must_use]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[must_use]
    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// YieldRate - basis points
// ============================================================================

/// A yield rate in basis points (100 bps = 1 %).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct YieldRate(u32);

impl YieldRate {
    #[must_use]
    pub fn from_bps(bps: u32) -> Self {
        Self(bps)
    }

    #[must_use]
    pub fn as_bps(self) -> u32 {
        self.0
    }

    /// Yield earned on `principal` over the full bond term.
    #[must_use]
    pub fn apply(self, principal: Amount) -> Amount {
        let raw = principal
            .value()
            .checked_mul(i128::from(self.0))
            .map_or(i128::MAX, |v| v / 10_000);
        Amount::new(raw)
    }
}

impl fmt::Display for YieldRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}

// ============================================================================
// Timestamp - epoch seconds
// ============================================================================

/// A point in time as whole seconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    #[must_use]
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    #[must_use]
    pub fn as_secs(self) -> u64 {
        self.0
    }

    /// Current wall-clock time. Pre-epoch clocks clamp to zero.
    #[must_use]
    pub fn now() -> Self {
        let secs = chrono::Utc::now().timestamp();
        Self(u64::try_from(secs).unwrap_or(0))
    }

    /// Seconds from `self` until `later`, zero when `later` is in the past.
    #[must_use]
    pub fn seconds_until(self, later: Self) -> u64 {
        later.0.saturating_sub(self.0)
    }

    #[must_use]
    pub fn add_secs(self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match chrono::DateTime::from_timestamp(self.0 as i64, 0) {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S UTC")),
            None => write!(f, "{}s", self.0),
        }
    }
}

// ============================================================================
// Ledger records
// ============================================================================

/// A time-locked, yield-bearing bond token. Immutable after mint.
///
/// A bond is owned by exactly one custody location at a time: the holder's
/// personal collection or a marketplace sale collection, never both. The
/// ledger enforces that; this type only describes the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bond {
    pub id: BondId,
    /// Amount committed at mint time.
    pub principal: Amount,
    pub yield_rate: YieldRate,
    pub strategy: StrategyId,
    /// Point after which the bond becomes redeemable.
    pub maturity_date: Timestamp,
}

/// A marketplace offer to sell one bond at a fixed price.
///
/// At most one listing exists per bond id. Created on list, deleted on
/// purchase or withdraw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplaceListing {
    pub bond_id: BondId,
    pub seller: Address,
    pub price: Amount,
    pub is_available: bool,
}

/// Terms for rolling a bond over at (or before) maturity.
///
/// Stored locally keyed by bond id when the user schedules automatic
/// reinvestment; also the parameter block of a manual reinvest call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReinvestmentConfig {
    pub new_duration_secs: u64,
    pub new_yield_rate: YieldRate,
    pub new_strategy: StrategyId,
}
