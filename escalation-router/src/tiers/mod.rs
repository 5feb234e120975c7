//! Tier executors: the three escalating answer strategies, the per-dispatch
//! state machine, the collaborator traits and the bounded worker pools.

pub mod backend;
pub mod pool;
pub mod state;

use serde::{Deserialize, Serialize};

pub use backend::{
    BackendAnswer, ContextAssembler, ContextBundle, ContextDocument, InferenceBackend,
    InferenceRequest, NoContextAssembler, ReasoningBackend, ReasoningRequest,
};
pub use pool::{CallError, WorkerPool};
pub use state::{DispatchState, DispatchTrace, EscalationReason, EscalationRecord};

/// Answer strategies ordered by cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Verified pattern store lookup
    Deterministic,
    /// Single bounded call to a lightweight inference backend
    Inference,
    /// Context assembly followed by the reasoning backend
    Reasoning,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Deterministic, Tier::Inference, Tier::Reasoning];

    /// 1-based tier number.
    pub fn level(self) -> u8 {
        match self {
            Self::Deterministic => 1,
            Self::Inference => 2,
            Self::Reasoning => 3,
        }
    }

    /// Next more expensive tier, if any.
    pub fn next(self) -> Option<Tier> {
        match self {
            Self::Deterministic => Some(Self::Inference),
            Self::Inference => Some(Self::Reasoning),
            Self::Reasoning => None,
        }
    }

    pub(crate) fn index(self) -> usize {
        self.level() as usize - 1
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tier{}", self.level())
    }
}
