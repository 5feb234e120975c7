//! Cognitive Escalation Router
//!
//! Routes each query to the cheapest strategy able to answer it:
//!
//! - **Tier 1**: verified lookup in the pattern store
//! - **Tier 2**: one bounded call to a lightweight inference backend
//! - **Tier 3**: context assembly followed by a rich reasoning backend
//!
//! Successful Tier 2/3 answers are written back to the pattern store and,
//! once reused often enough, promoted so later identical queries stay on
//! Tier 1.
//!
//! # Usage
//!
//! ```ignore
//! let router = EscalationRouter::builder()
//!     .inference(Arc::new(my_tier2))
//!     .reasoning(Arc::new(my_tier3))
//!     .build()?;
//! let result = router.dispatch(Query::new("check service X status")).await?;
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod gate;
pub mod metrics;
pub mod query;
pub mod router;
pub mod scorer;
pub mod store;
pub mod tiers;

// Re-export the dispatch surface
pub use router::{EscalationRouter, ExecutionResult, Maintenance, RouterBuilder};
pub use query::{ContextMap, Query};
pub use error::{BackendError, FingerprintError, RouterError};
pub use config::{ConfigError, RouterConfig};

// Re-export collaborator contracts
pub use tiers::{
    BackendAnswer, ContextAssembler, ContextBundle, ContextDocument, InferenceBackend,
    InferenceRequest, NoContextAssembler, ReasoningBackend, ReasoningRequest, Tier,
};

// Re-export building blocks
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use events::{EventBus, RouterEvent, SharedEventBus};
pub use fingerprint::{fingerprint, Fingerprint, RoutingKey, VerificationKey};
pub use gate::{GateResult, Issue, QualityGate};
pub use metrics::{MetricsSnapshot, RouterMetrics};
pub use scorer::{ComplexityBand, ComplexityScore, ComplexityScorer, HeuristicScorer};
pub use store::{Invalidation, PatternEntry, PatternStore, PromotionState};
