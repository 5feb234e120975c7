//! Quality Gate: pre-execution validation in front of Tier 2 and Tier 3.
//!
//! Four independent checks feed a weighted score:
//!
//! | check | failure mode |
//! |---|---|
//! | structural (length, encoding, control chars) | blocking |
//! | context completeness for the detected domain | degrading, proportional |
//! | budget (time left, cost units) for the target tier | blocking |
//! | safety (injection / override patterns) | hard fail, not scored |
//!
//! Validation is pure. The router decides what a `proceed = false` means.

pub mod domains;
pub mod safety;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, GateConfig};
use crate::query::Query;
use crate::tiers::Tier;

pub use safety::{SafetyCategory, SafetyFinding, SafetyScanner};

/// Which check raised an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCheck {
    Structural,
    ContextCompleteness,
    Budget,
    Safety,
}

/// How an issue affects the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Lowers the score only
    Degrading,
    /// Forces `proceed = false`
    Blocking,
}

/// A single finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub check: GateCheck,
    pub severity: Severity,
    pub message: String,
}

impl Issue {
    fn blocking(check: GateCheck, message: impl Into<String>) -> Self {
        Self {
            check,
            severity: Severity::Blocking,
            message: message.into(),
        }
    }

    fn degrading(check: GateCheck, message: impl Into<String>) -> Self {
        Self {
            check,
            severity: Severity::Degrading,
            message: message.into(),
        }
    }
}

/// Outcome of [`QualityGate::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    /// Weighted score in [0, 1]; 0 on a safety hit.
    pub score: f32,
    pub issues: Vec<Issue>,
    pub proceed: bool,
}

impl GateResult {
    pub fn safety_violation(&self) -> bool {
        self.issues.iter().any(|i| i.check == GateCheck::Safety)
    }

    pub fn budget_blocked(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.check == GateCheck::Budget && i.severity == Severity::Blocking)
    }

    /// Issue messages joined for logs and error reasons.
    pub fn summary(&self) -> String {
        if self.issues.is_empty() {
            return format!("score {:.2} below threshold", self.score);
        }
        self.issues
            .iter()
            .map(|i| i.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// The compiled gate.
#[derive(Debug, Clone)]
pub struct QualityGate {
    config: GateConfig,
    safety: SafetyScanner,
}

impl QualityGate {
    pub fn new(config: GateConfig) -> Result<Self, ConfigError> {
        let safety = SafetyScanner::new(&config.extra_safety_patterns)?;
        Ok(Self { config, safety })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Validate `query` for execution at `target` with `remaining` time left
    /// before the dispatch deadline.
    pub fn validate(&self, query: &Query, target: Tier, remaining: Duration) -> GateResult {
        let mut issues = Vec::new();

        let findings = self.safety.scan(query.text(), query.context());
        if !findings.is_empty() {
            issues.extend(findings.into_iter().map(|f| {
                Issue::blocking(
                    GateCheck::Safety,
                    format!("{} in {}: {}", f.category, f.location, f.reason),
                )
            }));
            return GateResult {
                score: 0.0,
                issues,
                proceed: false,
            };
        }

        let structural = self.check_structure(query, &mut issues);
        let context = self.check_context(query, &mut issues);
        let budget = self.check_budget(query, target, remaining, &mut issues);

        let c = &self.config;
        let total = c.structural_weight + c.context_weight + c.budget_weight;
        let score = ((c.structural_weight * structural
            + c.context_weight * context
            + c.budget_weight * budget)
            / total)
            .clamp(0.0, 1.0);

        let blocked = issues.iter().any(|i| i.severity == Severity::Blocking);
        GateResult {
            score,
            proceed: !blocked && score >= c.threshold,
            issues,
        }
    }

    fn check_structure(&self, query: &Query, issues: &mut Vec<Issue>) -> f32 {
        let before = issues.len();
        let text = query.text();
        let len = text.chars().count();
        if len < self.config.min_len || len > self.config.max_len {
            issues.push(Issue::blocking(
                GateCheck::Structural,
                format!(
                    "length {len} outside [{}, {}]",
                    self.config.min_len, self.config.max_len
                ),
            ));
        }
        let values = std::iter::once(text).chain(query.context().values().map(String::as_str));
        for value in values {
            if value.contains(char::REPLACEMENT_CHARACTER) {
                issues.push(Issue::blocking(
                    GateCheck::Structural,
                    "contains U+FFFD (invalid source encoding)",
                ));
                break;
            }
            if value
                .chars()
                .any(|c| c.is_control() && !matches!(c, '\n' | '\t' | '\r'))
            {
                issues.push(Issue::blocking(
                    GateCheck::Structural,
                    "contains control characters",
                ));
                break;
            }
        }
        if issues.len() == before {
            1.0
        } else {
            0.0
        }
    }

    fn check_context(&self, query: &Query, issues: &mut Vec<Issue>) -> f32 {
        let detected = domains::detect(query.text(), &self.config.domains);
        let (missing, required) = domains::missing_attributes(&detected, query.context());
        if required == 0 {
            return 1.0;
        }
        if !missing.is_empty() {
            let names: Vec<&str> = detected.iter().map(|d| d.name.as_str()).collect();
            issues.push(Issue::degrading(
                GateCheck::ContextCompleteness,
                format!(
                    "missing context for {}: {}",
                    names.join("/"),
                    missing.join(", ")
                ),
            ));
        }
        (required - missing.len()) as f32 / required as f32
    }

    fn check_budget(
        &self,
        query: &Query,
        target: Tier,
        remaining: Duration,
        issues: &mut Vec<Issue>,
    ) -> f32 {
        let Some(budget) = self.config.budget_for(target) else {
            return 1.0;
        };
        let before = issues.len();
        let required = budget.required_time();
        if remaining < required {
            issues.push(Issue::blocking(
                GateCheck::Budget,
                format!("{target} needs {required:?}, only {remaining:?} left"),
            ));
        }
        if let Some(limit) = query.cost_budget() {
            if budget.cost_units > limit {
                issues.push(Issue::blocking(
                    GateCheck::Budget,
                    format!(
                        "{target} costs {} units, budget is {limit}",
                        budget.cost_units
                    ),
                ));
            }
        }
        if issues.len() == before {
            1.0
        } else {
            0.0
        }
    }
}
