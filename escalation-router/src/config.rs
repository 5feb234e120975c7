//! Router configuration.
//!
//! Every section deserializes with per-field defaults so a partial TOML
//! table (or none at all) yields a working router. Durations are plain
//! integer `*_ms` / `*_secs` fields with typed accessors.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tiers::Tier;

/// Configuration rejected by [`RouterConfig::validate`] or the builder.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid safety pattern `{pattern}`: {reason}")]
    BadPattern { pattern: String, reason: String },

    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn check_unit(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, format!("{value} is outside [0, 1]")))
    }
}

/// Top-level router configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub store: StoreConfig,
    pub scorer: ScorerConfig,
    pub gate: GateConfig,
    pub tiers: TierConfig,
}

impl RouterConfig {
    /// Reject values that would make the router misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.store;
        if s.promotion_threshold == 0 {
            return Err(invalid("store.promotion_threshold", "must be at least 1"));
        }
        if s.promotion_window_secs == 0 {
            return Err(invalid("store.promotion_window_secs", "must be positive"));
        }
        if s.max_age_secs < s.idle_ttl_secs {
            return Err(invalid(
                "store.max_age_secs",
                "must not be shorter than store.idle_ttl_secs",
            ));
        }
        if s.sweep_interval_secs == 0 {
            return Err(invalid("store.sweep_interval_secs", "must be positive"));
        }
        for (field, secs) in [
            ("store.promotion_window_secs", s.promotion_window_secs),
            ("store.idle_ttl_secs", s.idle_ttl_secs),
            ("store.max_age_secs", s.max_age_secs),
        ] {
            if logical_secs(secs).is_none() {
                return Err(invalid(field, format!("{secs}s is out of range")));
            }
        }

        let sc = &self.scorer;
        for (field, w) in [
            ("scorer.token_weight", sc.token_weight),
            ("scorer.ambiguity_weight", sc.ambiguity_weight),
            ("scorer.multi_step_weight", sc.multi_step_weight),
            ("scorer.domain_weight", sc.domain_weight),
        ] {
            check_unit(field, w)?;
        }
        if sc.token_saturation == 0 {
            return Err(invalid("scorer.token_saturation", "must be positive"));
        }

        let g = &self.gate;
        check_unit("gate.threshold", g.threshold)?;
        if g.min_len == 0 || g.min_len > g.max_len {
            return Err(invalid(
                "gate.min_len",
                format!("need 0 < min_len <= max_len, got {}..{}", g.min_len, g.max_len),
            ));
        }
        if g.structural_weight + g.context_weight + g.budget_weight <= 0.0 {
            return Err(invalid("gate.*_weight", "weights must not all be zero"));
        }
        for (field, b) in [("gate.tier2", &g.tier2), ("gate.tier3", &g.tier3)] {
            if !b.margin.is_finite() || b.margin < 1.0 {
                return Err(invalid(field, "margin must be finite and >= 1.0"));
            }
            if b.try_required_time().is_none() {
                return Err(invalid(field, "estimated latency times margin overflows"));
            }
        }

        let t = &self.tiers;
        check_unit("tiers.escalation_threshold", t.escalation_threshold)?;
        if t.tier2_workers == 0 || t.tier3_workers == 0 {
            return Err(invalid("tiers.*_workers", "worker pools need at least one slot"));
        }
        if t.tier2_timeout_ms == 0 || t.tier3_timeout_ms == 0 {
            return Err(invalid("tiers.*_timeout_ms", "tier timeouts must be positive"));
        }
        Ok(())
    }
}

/// Pattern store lifecycle policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Hits inside the window needed for `Provisional -> Promoted`.
    pub promotion_threshold: u32,
    /// Sliding promotion window (24 logical hours by default).
    pub promotion_window_secs: u64,
    /// Idle time after which an unpromoted entry is evicted.
    pub idle_ttl_secs: u64,
    /// Absolute age ceiling, promoted entries included.
    pub max_age_secs: u64,
    /// Background sweep period.
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            promotion_threshold: 3,
            promotion_window_secs: 24 * 3600,
            idle_ttl_secs: 6 * 3600,
            max_age_secs: 7 * 24 * 3600,
            sweep_interval_secs: 60,
        }
    }
}

/// Seconds as a chrono duration, `None` past what chrono can represent.
fn logical_secs(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}

// Accessors saturate so an unvalidated config never panics mid-lookup.
impl StoreConfig {
    pub fn promotion_window(&self) -> chrono::Duration {
        logical_secs(self.promotion_window_secs).unwrap_or(chrono::Duration::MAX)
    }

    pub fn idle_ttl(&self) -> chrono::Duration {
        logical_secs(self.idle_ttl_secs).unwrap_or(chrono::Duration::MAX)
    }

    pub fn max_age(&self) -> chrono::Duration {
        logical_secs(self.max_age_secs).unwrap_or(chrono::Duration::MAX)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Weights for the reference heuristic scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub token_weight: f32,
    pub ambiguity_weight: f32,
    pub multi_step_weight: f32,
    pub domain_weight: f32,
    /// Token count at which the length component saturates at 1.0.
    pub token_saturation: usize,
    /// Terms that flag a domain-specific question.
    pub domain_terms: Vec<String>,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            token_weight: 0.35,
            ambiguity_weight: 0.25,
            multi_step_weight: 0.25,
            domain_weight: 0.15,
            token_saturation: 48,
            domain_terms: [
                "kubernetes",
                "latency",
                "throughput",
                "database",
                "replication",
                "certificate",
                "kernel",
                "regression",
                "compliance",
                "vulnerability",
                "forecast",
                "topology",
                "firmware",
                "protocol",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// A domain detected from query keywords, and the context attributes a
/// complete query in that domain carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRule {
    pub name: String,
    pub keywords: Vec<String>,
    pub required_context: Vec<String>,
}

impl DomainRule {
    fn new(name: &str, keywords: &[&str], required: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            required_context: required.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Expected cost of running a tier, checked against the caller's budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierBudget {
    /// Typical wall-clock latency of one call.
    pub estimated_latency_ms: u64,
    /// Safety multiplier applied to the estimate (stricter for Tier 3).
    pub margin: f32,
    /// Abstract cost units charged against `Query::cost_budget`.
    pub cost_units: f64,
}

impl TierBudget {
    /// Time the caller must have left for this tier to be admitted.
    pub fn required_time(&self) -> Duration {
        self.try_required_time().unwrap_or(Duration::MAX)
    }

    fn try_required_time(&self) -> Option<Duration> {
        let secs = Duration::from_millis(self.estimated_latency_ms).as_secs_f64()
            * f64::from(self.margin);
        Duration::try_from_secs_f64(secs).ok()
    }
}

/// Quality gate thresholds and check definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub min_len: usize,
    pub max_len: usize,
    /// Minimum combined score for `proceed = true`.
    pub threshold: f32,
    pub structural_weight: f32,
    pub context_weight: f32,
    pub budget_weight: f32,
    pub domains: Vec<DomainRule>,
    /// Extra case-insensitive regexes appended to the built-in safety set.
    pub extra_safety_patterns: Vec<String>,
    pub tier2: TierBudget,
    pub tier3: TierBudget,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_len: 2,
            max_len: 4096,
            threshold: 0.5,
            structural_weight: 0.4,
            context_weight: 0.3,
            budget_weight: 0.3,
            domains: vec![
                DomainRule::new(
                    "infrastructure",
                    &[
                        "service",
                        "server",
                        "cluster",
                        "deploy",
                        "deployment",
                        "pod",
                        "outage",
                        "uptime",
                    ],
                    &["environment"],
                ),
                DomainRule::new(
                    "security",
                    &["threat", "vulnerability", "incident", "breach", "malware", "cve"],
                    &["asset"],
                ),
                DomainRule::new(
                    "finance",
                    &["price", "portfolio", "invoice", "revenue", "stock"],
                    &["currency"],
                ),
            ],
            extra_safety_patterns: Vec::new(),
            tier2: TierBudget {
                estimated_latency_ms: 400,
                margin: 1.0,
                cost_units: 1.0,
            },
            tier3: TierBudget {
                estimated_latency_ms: 2_000,
                margin: 1.5,
                cost_units: 10.0,
            },
        }
    }
}

impl GateConfig {
    /// Budget profile for a tier. Tier 1 is free.
    pub fn budget_for(&self, tier: Tier) -> Option<&TierBudget> {
        match tier {
            Tier::Deterministic => None,
            Tier::Inference => Some(&self.tier2),
            Tier::Reasoning => Some(&self.tier3),
        }
    }
}

/// Tier execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Tier-2 answers at or above this confidence are accepted.
    pub escalation_threshold: f32,
    pub tier2_timeout_ms: u64,
    pub tier3_timeout_ms: u64,
    /// Concurrent Tier-2 backend calls.
    pub tier2_workers: usize,
    /// Concurrent Tier-3 calls (assembly and reasoning).
    pub tier3_workers: usize,
    /// Latency target for a Tier-1 hit.
    pub tier1_latency_budget_ms: u64,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: 0.7,
            tier2_timeout_ms: 1_500,
            tier3_timeout_ms: 20_000,
            tier2_workers: 32,
            tier3_workers: 8,
            tier1_latency_budget_ms: 5,
        }
    }
}

impl TierConfig {
    pub fn tier2_timeout(&self) -> Duration {
        Duration::from_millis(self.tier2_timeout_ms)
    }

    pub fn tier3_timeout(&self) -> Duration {
        Duration::from_millis(self.tier3_timeout_ms)
    }

    pub fn tier1_latency_budget(&self) -> Duration {
        Duration::from_millis(self.tier1_latency_budget_ms)
    }
}
