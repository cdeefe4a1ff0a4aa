//! Maturity and yield derivations.
//!
//! Pure functions from a [`Bond`] and a reference time to the facts a
//! holdings view needs. Nothing here is persisted; derived values are
//! recomputed on every refresh so they can never drift from the bond record.

use serde::{Deserialize, Serialize};

use crate::{Amount, Bond, Timestamp};

/// Derived maturity facts for one bond at one reference time.
///
/// Invariant: `expected_total == bond.principal + expected_yield`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaturityInfo {
    pub is_matured: bool,
    /// Seconds until the maturity date, zero once matured.
    pub time_until_maturity: u64,
    pub expected_yield: Amount,
    pub expected_total: Amount,
}

/// A bond paired with its derived maturity facts.
///
/// Query results carry this instead of bare [`MaturityInfo`] so callers can
/// act on the bond (redeem it, list it) without a second lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaturityView {
    pub bond: Bond,
    pub maturity: MaturityInfo,
}

/// Derive maturity facts for `bond` as of `now`.
#[must_use]
pub fn compute_maturity(bond: &Bond, now: Timestamp) -> MaturityInfo {
    let expected_yield = bond.yield_rate.apply(bond.principal);
    MaturityInfo {
        is_matured: now >= bond.maturity_date,
        time_until_maturity: now.seconds_until(bond.maturity_date),
        expected_yield,
        expected_total: bond.principal.saturating_add(expected_yield),
    }
}

/// Compact human-readable time-to-maturity.
///
/// Returns `"Matured"` at or past maturity, otherwise the most significant
/// non-zero unit pair: `"2d 5h"`, `"5h 12m"`, `"12m"`.
#[must_use]
pub fn format_time_remaining(seconds: i64) -> String {
    if seconds <= 0 {
        return "Matured".to_string();
    }
    let seconds = seconds as u64;
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;

    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
