//! Per-dispatch tier state machine.
//!
//! A dispatch starts at Tier 1 and only ever moves to a strictly more
//! expensive tier or to `Failed`. Every move is recorded so callers can
//! audit the path a query took.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Tier;

/// Where a dispatch currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Active(Tier),
    /// Terminal. No cache write happens from here.
    Failed,
}

/// Reasons a dispatch moved to a more expensive tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// No verified pattern store entry
    CacheMiss,
    /// Complexity scored in the high band, Tier 2 skipped
    HighComplexity { score: f32 },
    /// Tier 2 answered below the acceptance threshold
    LowConfidence { confidence: f32, threshold: f32 },
    /// Tier 2 did not answer within its own timeout
    BackendTimeout { elapsed_ms: u64 },
    /// Tier 2 backend returned an error
    BackendFailure { message: String },
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CacheMiss => write!(f, "cache miss"),
            Self::HighComplexity { score } => write!(f, "high complexity ({score:.2})"),
            Self::LowConfidence {
                confidence,
                threshold,
            } => write!(f, "confidence {confidence:.2} below {threshold:.2}"),
            Self::BackendTimeout { elapsed_ms } => write!(f, "timed out after {elapsed_ms}ms"),
            Self::BackendFailure { message } => write!(f, "backend failure: {message}"),
        }
    }
}

/// Record of one escalation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    /// From which tier
    pub from: Tier,
    /// To which tier
    pub to: Tier,
    /// Why the dispatch moved on
    pub reason: EscalationReason,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}

/// Ordered record of the tiers one dispatch visited.
#[derive(Debug, Clone)]
pub struct DispatchTrace {
    state: DispatchState,
    visited: Vec<Tier>,
    escalations: Vec<EscalationRecord>,
}

impl Default for DispatchTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchTrace {
    /// Every dispatch starts at Tier 1.
    pub fn new() -> Self {
        Self {
            state: DispatchState::Active(Tier::Deterministic),
            visited: vec![Tier::Deterministic],
            escalations: Vec::new(),
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// The active tier, or `None` once failed.
    pub fn current(&self) -> Option<Tier> {
        match self.state {
            DispatchState::Active(tier) => Some(tier),
            DispatchState::Failed => None,
        }
    }

    /// Move to a strictly more expensive tier.
    ///
    /// Returns `false` and leaves the trace untouched when the move would
    /// go sideways, backwards, or out of `Failed`.
    pub fn escalate(&mut self, to: Tier, reason: EscalationReason) -> bool {
        let from = match self.state {
            DispatchState::Active(from) if to > from => from,
            _ => {
                tracing::warn!(state = ?self.state, to = %to, "refusing non-monotonic escalation");
                return false;
            }
        };
        tracing::debug!(from = %from, to = %to, reason = %reason, "escalating");
        self.state = DispatchState::Active(to);
        self.visited.push(to);
        self.escalations.push(EscalationRecord {
            from,
            to,
            reason,
            timestamp: Utc::now(),
        });
        true
    }

    pub fn fail(&mut self) {
        self.state = DispatchState::Failed;
    }

    pub fn visited(&self) -> &[Tier] {
        &self.visited
    }

    pub fn escalations(&self) -> &[EscalationRecord] {
        &self.escalations
    }

    pub fn into_parts(self) -> (Vec<Tier>, Vec<EscalationRecord>) {
        (self.visited, self.escalations)
    }
}
