//! Per-operation transaction status machine.
//!
//! Every logical operation (a mint, one bond's redemption, one listing)
//! owns a [`StatusSlot`]. The slot drives a single instance of:
//!
//! ```text
//! ┌──────┐  begin(phase)  ┌────────────────┐  succeed/fail  ┌────────────────┐
//! │ Idle │ ─────────────> │ Working(phase) │ ─────────────> │ Success/Failed │
//! └──────┘                └────────────────┘                └────────────────┘
//!     ^                        │ advance(phase)                  │
//!     │                        └──── (multi-step ops) ────┐      │
//!     │                                                   v      │
//!     └──────────── auto-reset (3s / 5s) or dismiss() ───────────┘
//! ```
//!
//! `begin` while another `Working` state is active is rejected - the
//! idempotent guard against double submission from repeated user clicks.
//! A `tx_id` is representable only in terminal states, so "idle with a
//! transaction id" cannot be expressed at all.
//!
//! Auto-reset is generation-guarded: starting a new operation (or
//! dismissing) bumps the slot's generation, and a sleeping reset task only
//! fires if its generation is still current. Stale resets can never clobber
//! a newer operation's status.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use bondflow_gateway::ClassifiedError;
use bondflow_types::{BondId, TxId};

/// Delay before a success banner resets to idle.
pub const SUCCESS_RESET: Duration = Duration::from_secs(3);
/// Delay before an error banner resets to idle.
pub const ERROR_RESET: Duration = Duration::from_secs(5);

/// The working phase of an in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Checking,
    Setup,
    Minting,
    Redeeming,
    Reinvesting,
    Listing,
    Purchasing,
    Withdrawing,
}

impl Phase {
    /// Banner text while this phase is active.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Checking => "Checking account...",
            Self::Setup => "Setting up account...",
            Self::Minting => "Minting bond...",
            Self::Redeeming => "Redeeming bond...",
            Self::Reinvesting => "Reinvesting bond...",
            Self::Listing => "Listing bond for sale...",
            Self::Purchasing => "Purchasing bond...",
            Self::Withdrawing => "Withdrawing listing...",
        }
    }
}

/// Observable status of one logical operation.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionStatus {
    Idle,
    Working(Phase),
    Success {
        tx_id: TxId,
    },
    Failed {
        error: ClassifiedError,
        /// Present when the failure happened after submission.
        tx_id: Option<TxId>,
    },
}

impl TransactionStatus {
    #[must_use]
    pub fn is_working(&self) -> bool {
        matches!(self, Self::Working(_))
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Failed { .. })
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => Ok(()),
            Self::Working(phase) => f.write_str(phase.label()),
            Self::Success { tx_id } => write!(f, "Transaction {tx_id} sealed"),
            Self::Failed { error, .. } => write!(f, "{error}"),
        }
    }
}

#[derive(Debug)]
struct SlotInner {
    state: watch::Sender<TransactionStatus>,
    generation: AtomicU64,
}

/// Handle to one operation's status. Cheap to clone; all clones share the
/// same underlying state.
#[derive(Debug, Clone)]
pub struct StatusSlot {
    inner: Arc<SlotInner>,
}

impl Default for StatusSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSlot {
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(TransactionStatus::Idle);
        Self {
            inner: Arc::new(SlotInner {
                state,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Observe status changes. The receiver always sees the latest value.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TransactionStatus> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn current(&self) -> TransactionStatus {
        self.inner.state.borrow().clone()
    }

    /// Enter a working phase from any non-working state.
    ///
    /// Rejected while a working phase is active: two submissions of the same
    /// operation cannot overlap, however fast the user clicks.
    pub fn begin(&self, phase: Phase) -> Result<(), crate::EngineError> {
        let mut rejected = false;
        self.inner.state.send_if_modified(|status| {
            if status.is_working() {
                rejected = true;
                return false;
            }
            *status = TransactionStatus::Working(phase);
            true
        });
        if rejected {
            return Err(crate::EngineError::InFlight);
        }
        self.bump();
        Ok(())
    }

    /// Move to the next phase of a multi-step operation.
    ///
    /// Only meaningful while working; ignored otherwise so a racing
    /// dismissal cannot resurrect a stale phase.
    pub fn advance(&self, phase: Phase) {
        self.inner.state.send_if_modified(|status| {
            if status.is_working() {
                *status = TransactionStatus::Working(phase);
                true
            } else {
                false
            }
        });
    }

    /// Enter `Success` and schedule the auto-reset.
    pub fn succeed(&self, tx_id: TxId) {
        self.finish(TransactionStatus::Success { tx_id }, SUCCESS_RESET);
    }

    /// Enter `Failed` and schedule the auto-reset.
    pub fn fail(&self, error: ClassifiedError, tx_id: Option<TxId>) {
        self.finish(TransactionStatus::Failed { error, tx_id }, ERROR_RESET);
    }

    /// Explicitly reset a terminal banner to idle.
    ///
    /// Returns `false` (and does nothing) mid-flight or when already idle.
    pub fn dismiss(&self) -> bool {
        let mut dismissed = false;
        self.inner.state.send_if_modified(|status| {
            if status.is_terminal() {
                *status = TransactionStatus::Idle;
                dismissed = true;
                true
            } else {
                false
            }
        });
        if dismissed {
            // Cancel the pending auto-reset.
            self.bump();
        }
        dismissed
    }

    fn finish(&self, status: TransactionStatus, delay: Duration) {
        self.inner.state.send_replace(status);
        let generation = self.bump();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if inner.generation.load(Ordering::Acquire) == generation {
                inner.state.send_replace(TransactionStatus::Idle);
            }
        });
    }

    fn bump(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Lazily-created status slots keyed by bond id, for operations that run
/// per bond (redemptions, listings).
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    slots: Arc<Mutex<HashMap<BondId, StatusSlot>>>,
}

impl StatusBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot for `id`, created idle on first use.
    #[must_use]
    pub fn slot(&self, id: BondId) -> StatusSlot {
        let mut slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        slots.entry(id).or_default().clone()
    }
}
