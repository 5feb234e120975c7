//! Complexity Scorer: a bounded estimate of how much reasoning a query
//! needs, used only for tier selection.
//!
//! The router depends on the [`ComplexityScorer`] trait, so a learned
//! model can replace [`HeuristicScorer`] without touching dispatch.

pub mod heuristic;

use serde::{Deserialize, Serialize};

use crate::query::Query;

pub use heuristic::{HeuristicScorer, ScoreBreakdown};

/// Upper bound (exclusive) of the low band.
pub const LOW_BAND_CEILING: f32 = 0.35;
/// Lower bound (inclusive) of the high band.
pub const HIGH_BAND_FLOOR: f32 = 0.65;

/// Complexity in [0, 1]. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComplexityScore(f32);

impl ComplexityScore {
    /// Clamp into [0, 1]; NaN maps to 0.
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            Self(0.0)
        } else {
            Self(value.clamp(0.0, 1.0))
        }
    }

    pub fn value(self) -> f32 {
        self.0
    }

    pub fn band(self) -> ComplexityBand {
        if self.0 < LOW_BAND_CEILING {
            ComplexityBand::Low
        } else if self.0 < HIGH_BAND_FLOOR {
            ComplexityBand::Medium
        } else {
            ComplexityBand::High
        }
    }
}

/// Semantic bands of a [`ComplexityScore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityBand {
    Low,
    Medium,
    High,
}

/// Anything that can score a query.
pub trait ComplexityScorer: Send + Sync {
    fn score(&self, query: &Query) -> ComplexityScore;
}

impl<F> ComplexityScorer for F
where
    F: Fn(&Query) -> ComplexityScore + Send + Sync,
{
    fn score(&self, query: &Query) -> ComplexityScore {
        self(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamping() {
        assert_eq!(ComplexityScore::new(1.5).value(), 1.0);
        assert_eq!(ComplexityScore::new(-1.0).value(), 0.0);
        assert_eq!(ComplexityScore::new(f32::NAN).value(), 0.0);
    }

    #[test]
    fn test_band_edges() {
        assert_eq!(ComplexityScore::new(0.0).band(), ComplexityBand::Low);
        assert_eq!(ComplexityScore::new(0.349).band(), ComplexityBand::Low);
        assert_eq!(ComplexityScore::new(0.35).band(), ComplexityBand::Medium);
        assert_eq!(ComplexityScore::new(0.649).band(), ComplexityBand::Medium);
        assert_eq!(ComplexityScore::new(0.65).band(), ComplexityBand::High);
    }

    #[test]
    fn test_closure_scorer() {
        let fixed = |_: &Query| ComplexityScore::new(0.9);
        assert_eq!(fixed.score(&Query::new("x")).band(), ComplexityBand::High);
    }
}
