//! Reference heuristic: weighted sum of length, structural ambiguity, a
//! multi-step detector and a domain flag. Runs in microseconds.

use serde::{Deserialize, Serialize};

use super::{ComplexityScore, ComplexityScorer};
use crate::config::ScorerConfig;
use crate::gate::domains::words;
use crate::query::Query;

/// Clauses, references and nesting that make a question harder to pin down.
const AMBIGUITY_MARKERS: &[&str] = &[
    "if", "whether", "unless", "although", "though", "while", "which", "that", "when", "where",
    "it", "they", "them", "this", "those", "these", "or", "either", "otherwise",
];

/// Ambiguity marker count at which the component saturates.
const AMBIGUITY_SATURATION: f32 = 6.0;

/// Sequencing and causal connectives.
const MULTI_STEP_MARKERS: &[&str] = &[
    "then",
    "after",
    "afterwards",
    "before",
    "because",
    "therefore",
    "first",
    "second",
    "finally",
    "next",
    "once",
    "until",
    "step",
    "steps",
    "why",
    "compare",
    "consequently",
];

/// Component values behind a score, for logs and tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub tokens: f32,
    pub ambiguity: f32,
    pub multi_step: f32,
    pub domain: f32,
    pub total: f32,
}

/// Deterministic default scorer.
#[derive(Debug, Clone)]
pub struct HeuristicScorer {
    config: ScorerConfig,
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self::new(ScorerConfig::default())
    }
}

impl HeuristicScorer {
    pub fn new(mut config: ScorerConfig) -> Self {
        for term in &mut config.domain_terms {
            *term = term.to_lowercase();
        }
        Self { config }
    }

    pub fn breakdown(&self, query: &Query) -> ScoreBreakdown {
        let text = query.text();
        let tokens: Vec<String> = words(text).collect();
        let c = &self.config;

        let length = (tokens.len() as f32 / c.token_saturation as f32).min(1.0);

        let markers = tokens
            .iter()
            .filter(|t| AMBIGUITY_MARKERS.contains(&t.as_str()))
            .count();
        let punctuation = text.chars().filter(|&ch| ch == ',' || ch == ';').count()
            + max_paren_depth(text)
            + text.matches('?').count().saturating_sub(1);
        let ambiguity = ((markers + punctuation) as f32 / AMBIGUITY_SATURATION).min(1.0);

        let multi_step = if tokens
            .iter()
            .any(|t| MULTI_STEP_MARKERS.contains(&t.as_str()))
        {
            1.0
        } else {
            0.0
        };

        let domain = if tokens.iter().any(|t| c.domain_terms.contains(t)) {
            1.0
        } else {
            0.0
        };

        let total = ComplexityScore::new(
            c.token_weight * length
                + c.ambiguity_weight * ambiguity
                + c.multi_step_weight * multi_step
                + c.domain_weight * domain,
        )
        .value();

        ScoreBreakdown {
            tokens: length,
            ambiguity,
            multi_step,
            domain,
            total,
        }
    }
}

impl ComplexityScorer for HeuristicScorer {
    fn score(&self, query: &Query) -> ComplexityScore {
        ComplexityScore::new(self.breakdown(query).total)
    }
}

fn max_paren_depth(text: &str) -> usize {
    let mut depth = 0usize;
    let mut max = 0usize;
    for ch in text.chars() {
        match ch {
            '(' | '[' | '{' => {
                depth += 1;
                max = max.max(depth);
            }
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max
}
