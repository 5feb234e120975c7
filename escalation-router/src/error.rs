//! Error taxonomy for the dispatch path.
//!
//! `InvalidQuery` and `GateRejected` are returned before any tier runs.
//! Tier-2 backend failures never surface here: the router recovers them by
//! escalating. Tier-3 failures surface as [`RouterError::Failed`] with the
//! underlying cause attached.

use std::time::Duration;

use thiserror::Error;

use crate::gate::Issue;
use crate::tiers::Tier;

/// Opaque failure reported by an external collaborator (inference backend,
/// context assembly service, reasoning backend).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend request failed: {0}")]
    Request(String),

    #[error("malformed backend response: {0}")]
    Parse(String),

    #[error("backend declined to answer")]
    Declined,

    #[error("backend call cancelled")]
    Cancelled,
}

impl BackendError {
    /// Stable snake_case label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::Request(_) => "request",
            Self::Parse(_) => "parse",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Fingerprinting failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FingerprintError {
    #[error("query is empty after normalization")]
    EmptyQuery,
}

/// Errors surfaced to callers of [`crate::EscalationRouter::dispatch`].
#[derive(Debug, Error)]
pub enum RouterError {
    /// Empty or malformed input, rejected before fingerprinting.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The quality gate hard-failed (safety hit or insufficient score).
    #[error("quality gate rejected query: {reason}")]
    GateRejected { reason: String, issues: Vec<Issue> },

    /// The dispatch deadline elapsed while a tier was running.
    #[error("{tier} exceeded the dispatch deadline after {elapsed:?}")]
    BackendTimeout { tier: Tier, elapsed: Duration },

    /// A collaborator failed at a tier that cannot recover locally.
    #[error("{tier} backend error: {source}")]
    BackendError {
        tier: Tier,
        #[source]
        source: BackendError,
    },

    /// The declared timeout or cost budget cannot cover the selected tier.
    #[error("budget exceeded for {tier}: {detail}")]
    BudgetExceeded { tier: Tier, detail: String },

    /// Terminal state after Tier 3 exhausted its options.
    #[error("dispatch failed: {cause}")]
    Failed {
        #[source]
        cause: Box<RouterError>,
    },
}

impl RouterError {
    /// Wrap a cause into the terminal `Failed` state.
    pub fn failed(cause: RouterError) -> Self {
        Self::Failed {
            cause: Box::new(cause),
        }
    }

    /// Stable snake_case label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidQuery(_) => "invalid_query",
            Self::GateRejected { .. } => "gate_rejected",
            Self::BackendTimeout { .. } => "backend_timeout",
            Self::BackendError { .. } => "backend_error",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::Failed { .. } => "failed",
        }
    }

    /// The innermost cause of a `Failed` chain (or `self`).
    pub fn root_cause(&self) -> &RouterError {
        match self {
            Self::Failed { cause } => cause.root_cause(),
            other => other,
        }
    }
}

impl From<FingerprintError> for RouterError {
    fn from(err: FingerprintError) -> Self {
        Self::InvalidQuery(err.to_string())
    }
}
