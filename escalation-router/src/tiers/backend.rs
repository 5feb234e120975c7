//! Collaborator contracts for Tier 2 and Tier 3.
//!
//! The router never looks inside these services. Every call receives a
//! [`CancellationToken`] which the router cancels when the dispatch
//! deadline passes; implementations should stop work and return
//! [`BackendError::Cancelled`] promptly when it fires.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::BackendError;
use crate::query::{ContextMap, Query};

/// Tier-2 call: the query plus, for medium-complexity queries, the caller's
/// context attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub correlation_id: String,
    pub query: String,
    pub context: Option<ContextMap>,
    /// Time the backend has before the router gives up on it.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

/// What a backend produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendAnswer {
    pub answer: String,
    /// Self-reported or estimated, in [0, 1].
    pub confidence: f32,
}

impl BackendAnswer {
    pub fn new(answer: impl Into<String>, confidence: f32) -> Self {
        Self {
            answer: answer.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// One piece of supplementary material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDocument {
    /// Where it came from (knowledge base, runbook, ticket, ...)
    pub source: String,
    pub content: String,
}

/// Material gathered for Tier 3 before the reasoning call starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    #[serde(default)]
    pub documents: Vec<ContextDocument>,
    /// Attributes the assembler resolved in addition to the caller's.
    #[serde(default)]
    pub attributes: ContextMap,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.attributes.is_empty()
    }

    /// Plain-text rendering for prompt-based backends.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.attributes {
            out.push_str(&format!("{key}: {value}\n"));
        }
        for doc in &self.documents {
            out.push_str(&format!("\n[{}]\n{}\n", doc.source, doc.content));
        }
        out
    }
}

/// Tier-3 call: the query, the caller context and the assembled bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub correlation_id: String,
    pub query: String,
    pub caller_context: ContextMap,
    pub bundle: ContextBundle,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

/// Lightweight inference service (Tier 2).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn invoke(
        &self,
        request: &InferenceRequest,
        cancel: CancellationToken,
    ) -> Result<BackendAnswer, BackendError>;
}

/// Context assembly service (Tier 3, first step).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContextAssembler: Send + Sync {
    async fn assemble(
        &self,
        query: &Query,
        cancel: CancellationToken,
    ) -> Result<ContextBundle, BackendError>;
}

/// Rich-context reasoning service (Tier 3, second step).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn invoke(
        &self,
        request: &ReasoningRequest,
        cancel: CancellationToken,
    ) -> Result<BackendAnswer, BackendError>;
}

/// Assembler for deployments without a knowledge service: Tier 3 runs on
/// the caller's context alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContextAssembler;

#[async_trait]
impl ContextAssembler for NoContextAssembler {
    async fn assemble(
        &self,
        _query: &Query,
        _cancel: CancellationToken,
    ) -> Result<ContextBundle, BackendError> {
        Ok(ContextBundle::default())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
