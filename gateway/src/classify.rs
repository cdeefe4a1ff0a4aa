//! Failure classification.
//!
//! Maps raw ledger-client failures into a fixed taxonomy with user-facing
//! `{title, message}` pairs. A structured [`ErrorCode`] from the collaborator
//! always wins; case-insensitive substring matching over the raw message is
//! the last-resort adapter for clients that only report text. Unmatched
//! errors fall into [`ErrorKind::Unknown`] with the original message
//! preserved verbatim.
//!
//! Classification is total: every input produces a classification, nothing
//! here can panic.

use serde::{Deserialize, Serialize};

use crate::{ErrorCode, GatewayError, RawLedgerError};

/// The stable failure taxonomy surfaced to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The user declined the request in their wallet; retrying is fine.
    UserRejected,
    /// Balance too low; recoverable after funding.
    InsufficientFunds,
    /// Transient transport problem.
    Network,
    /// Requires re-authentication upstream of this core.
    SessionExpired,
    /// Non-recoverable without an external fix.
    Configuration,
    /// A locally-raised precondition (not matured, not found, bad price).
    /// Never produced by [`classify`]; coordinators construct it directly.
    Precondition,
    /// Fallback; the original message is preserved.
    Unknown,
}

impl ErrorKind {
    /// Banner title for this kind.
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::UserRejected => "Request Declined",
            Self::InsufficientFunds => "Insufficient Funds",
            Self::Network => "Network Problem",
            Self::SessionExpired => "Session Expired",
            Self::Configuration => "Configuration Error",
            Self::Precondition => "Action Not Available",
            Self::Unknown => "Something Went Wrong",
        }
    }

    /// Whether retrying the same action can ever succeed without an
    /// external fix.
    #[must_use]
    pub fn is_recoverable(self) -> bool {
        match self {
            Self::UserRejected
            | Self::InsufficientFunds
            | Self::Network
            | Self::SessionExpired
            | Self::Precondition => true,
            Self::Configuration => false,
            // Unknown: assume retryable rather than dead-ending the user.
            Self::Unknown => true,
        }
    }

    fn user_message(self) -> &'static str {
        match self {
            Self::UserRejected => "The request was declined in your wallet. No changes were made.",
            Self::InsufficientFunds => {
                "Your account balance is too low to complete this operation."
            }
            Self::Network => "A network problem interrupted the request. Please try again.",
            Self::SessionExpired => "Your session has expired. Reconnect your wallet and retry.",
            Self::Configuration => "The application is misconfigured. Please contact support.",
            // Precondition and Unknown carry their own message.
            Self::Precondition | Self::Unknown => "",
        }
    }
}

/// A classified failure ready for a status banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub title: String,
    pub message: String,
}

impl ClassifiedError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: kind.title().to_string(),
            message: message.into(),
        }
    }

    /// A locally-raised precondition failure that never reached the ledger.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition, message)
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

/// Classify a gateway failure into the taxonomy.
#[must_use]
pub fn classify(error: &GatewayError) -> ClassifiedError {
    match error {
        GatewayError::Query(raw) | GatewayError::Submit(raw) => classify_raw(raw),
        GatewayError::Sealed { message, .. } => classify_text(message),
    }
}

/// Classify a raw ledger-client failure: structured code first, message
/// heuristics second.
#[must_use]
pub fn classify_raw(raw: &RawLedgerError) -> ClassifiedError {
    if let Some(code) = raw.code {
        let kind = match code {
            ErrorCode::UserRejected => ErrorKind::UserRejected,
            ErrorCode::InsufficientFunds => ErrorKind::InsufficientFunds,
            ErrorCode::Network => ErrorKind::Network,
            ErrorCode::SessionExpired => ErrorKind::SessionExpired,
            ErrorCode::Configuration => ErrorKind::Configuration,
        };
        return ClassifiedError::new(kind, kind.user_message());
    }
    classify_text(&raw.message)
}

/// Substring heuristics over an error message. Last-resort adapter for
/// collaborators that report no structured code.
#[must_use]
pub fn classify_text(message: &str) -> ClassifiedError {
    let lower = message.to_lowercase();

    let matched = [
        (
            ErrorKind::UserRejected,
            &["declined", "rejected by user", "user rejected", "denied by user"][..],
        ),
        (ErrorKind::InsufficientFunds, &["insufficient"][..]),
        (
            ErrorKind::Network,
            &["network", "timeout", "timed out", "connection", "unreachable"][..],
        ),
        (
            ErrorKind::SessionExpired,
            &["session expired", "session has expired", "not authenticated", "unauthenticated"][..],
        ),
        (
            ErrorKind::Configuration,
            &["not configured", "misconfigur", "missing contract", "invalid configuration"][..],
        ),
    ]
    .into_iter()
    .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)));

    match matched {
        Some((kind, _)) => ClassifiedError::new(kind, kind.user_message()),
        None => ClassifiedError::new(ErrorKind::Unknown, message),
    }
}
