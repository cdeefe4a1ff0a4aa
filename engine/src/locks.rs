//! Per-bond operation locks.
//!
//! Status slots serialize operations of one *type*, but nothing else stops
//! a listing and a redemption from racing on the same bond. [`BondLocks`]
//! is the shared map the mutating coordinators acquire from before
//! submitting anything bond-specific; the second acquirer gets
//! [`EngineError::BondBusy`] instead of a seat in the race.
//!
//! Critical sections are instantaneous (insert/remove under a std mutex),
//! so no async locking is needed; the guard is held across awaits but the
//! mutex is not.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use bondflow_types::BondId;

use crate::EngineError;

/// Shared set of bond ids with an operation in flight.
#[derive(Debug, Clone, Default)]
pub struct BondLocks {
    held: Arc<Mutex<HashSet<BondId>>>,
}

impl BondLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id` for one operation. The claim is released when the guard
    /// drops, including on error paths.
    pub fn acquire(&self, id: BondId) -> Result<BondGuard, EngineError> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(id) {
            return Err(EngineError::BondBusy(id));
        }
        Ok(BondGuard {
            id,
            held: Arc::clone(&self.held),
        })
    }
}

/// Exclusive claim on one bond id. Releases on drop.
#[derive(Debug)]
pub struct BondGuard {
    id: BondId,
    held: Arc<Mutex<HashSet<BondId>>>,
}

impl Drop for BondGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
