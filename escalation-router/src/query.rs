//! The unit of work submitted to the router.

use std::collections::BTreeMap;
use std::time::Duration;

/// Caller-supplied context attributes, ordered by key.
pub type ContextMap = BTreeMap<String, String>;

/// Deadline applied when the caller does not declare one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// An immutable query: raw text, context attributes, deadline and
/// correlation id. Build one with [`Query::new`] and the `with_*` methods
/// before handing it to the router.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    correlation_id: String,
    text: String,
    context: ContextMap,
    timeout: Duration,
    cost_budget: Option<f64>,
}

impl Query {
    /// New query with a random correlation id and the default timeout.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            context: ContextMap::new(),
            timeout: DEFAULT_TIMEOUT,
            cost_budget: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// Add one context attribute (later values for the same key win).
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_context_map(mut self, context: ContextMap) -> Self {
        self.context.extend(context);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Declare a cost budget in abstract cost units (see `TierBudget::cost_units`).
    pub fn with_cost_budget(mut self, budget: f64) -> Self {
        self.cost_budget = Some(budget);
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn context(&self) -> &ContextMap {
        &self.context
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cost_budget(&self) -> Option<f64> {
        self.cost_budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let q = Query::new("check service status");
        assert_eq!(q.timeout(), DEFAULT_TIMEOUT);
        assert!(q.context().is_empty());
        assert!(q.cost_budget().is_none());
        assert!(!q.correlation_id().is_empty());
    }

    #[test]
    fn test_context_is_ordered() {
        let q = Query::new("x")
            .with_context("zone", "eu")
            .with_context("env", "prod");
        let keys: Vec<_> = q.context().keys().cloned().collect();
        assert_eq!(keys, vec!["env".to_string(), "zone".to_string()]);
    }
}
