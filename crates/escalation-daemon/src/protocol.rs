//! JSON-lines command protocol.
//!
//! One command per input line, one response per output line:
//!
//! ```text
//! {"op":"dispatch","id":"r1","query":"check service X status","context":{"environment":"prod"}}
//! {"op":"invalidate","notice":{"kind":"attribute","key":"environment","value":"prod"}}
//! {"op":"metrics"}
//! ```
//!
//! Responses are tagged by `type`: `result`, `invalidated`, `metrics` or
//! `error`.

use std::time::Duration;

use escalation_router::store::StoreStats;
use escalation_router::{
    ContextMap, EscalationRouter, ExecutionResult, Invalidation, MetricsSnapshot, Query,
    RouterError,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Dispatch {
        /// Echoed back and used as the correlation id
        #[serde(default)]
        id: Option<String>,
        query: String,
        #[serde(default)]
        context: ContextMap,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        cost_budget: Option<f64>,
    },
    Invalidate {
        notice: Invalidation,
    },
    Metrics,
}

impl Command {
    /// Build the router query for a `dispatch` command.
    pub fn to_query(&self) -> Option<Query> {
        let Command::Dispatch {
            id,
            query,
            context,
            timeout_ms,
            cost_budget,
        } = self
        else {
            return None;
        };
        let mut q = Query::new(query.clone()).with_context_map(context.clone());
        if let Some(id) = id {
            q = q.with_correlation_id(id.clone());
        }
        if let Some(ms) = timeout_ms {
            q = q.with_timeout(Duration::from_millis(*ms));
        }
        if let Some(budget) = cost_budget {
            q = q.with_cost_budget(*budget);
        }
        Some(q)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Result {
        #[serde(flatten)]
        result: ExecutionResult,
    },
    Invalidated {
        count: usize,
    },
    Metrics {
        metrics: MetricsSnapshot,
        store: StoreStats,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        kind: String,
        message: String,
    },
}

impl Response {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::Error {
            id: None,
            kind: "bad_request".to_string(),
            message: message.into(),
        }
    }

    fn from_router_error(id: String, err: &RouterError) -> Self {
        let kind = match err {
            RouterError::Failed { cause } => format!("failed:{}", cause.root_cause().kind()),
            other => other.kind().to_string(),
        };
        Self::Error {
            id: Some(id),
            kind,
            message: err.to_string(),
        }
    }

    /// Single-line JSON encoding.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","kind":"encode","message":"{e}"}}"#)
        })
    }
}

/// Parse and execute one input line.
pub async fn handle_line(router: &EscalationRouter, line: &str) -> Response {
    match serde_json::from_str::<Command>(line) {
        Ok(command) => execute(router, command).await,
        Err(e) => Response::bad_request(e.to_string()),
    }
}

pub async fn execute(router: &EscalationRouter, command: Command) -> Response {
    match command {
        Command::Metrics => Response::Metrics {
            metrics: router.snapshot(),
            store: router.store().stats(),
        },
        Command::Invalidate { notice } => {
            let count = router.store().apply(&notice);
            debug!(?notice, count, "invalidate command");
            Response::Invalidated { count }
        }
        dispatch @ Command::Dispatch { .. } => {
            let Some(query) = dispatch.to_query() else {
                return Response::bad_request("not a dispatch command");
            };
            let id = query.correlation_id().to_string();
            match router.dispatch(query).await {
                Ok(result) => Response::Result { result },
                Err(err) => Response::from_router_error(id, &err),
            }
        }
    }
}
