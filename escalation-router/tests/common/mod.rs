//! Shared test collaborators with call counters.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use escalation_router::{
    BackendAnswer, BackendError, ComplexityScore, ContextAssembler, ContextBundle,
    ContextDocument, EscalationRouter, InferenceBackend, InferenceRequest, Query,
    ReasoningBackend, ReasoningRequest, RouterConfig,
};
use tokio_util::sync::CancellationToken;

/// Shared, ordered record of collaborator calls.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// What a scripted collaborator does when called.
#[derive(Debug, Clone)]
pub enum Behavior {
    Answer(&'static str, f32),
    Fail(BackendError),
    /// Never completes and ignores cancellation
    Hang,
    Slow(Duration, &'static str, f32),
}

/// Backend usable at Tier 2 or Tier 3.
#[derive(Debug)]
pub struct Scripted {
    name: &'static str,
    behavior: Behavior,
    calls: AtomicUsize,
    log: Option<CallLog>,
    bundles: Mutex<Vec<ContextBundle>>,
}

impl Scripted {
    pub fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior,
            calls: AtomicUsize::new(0),
            log: None,
            bundles: Mutex::new(Vec::new()),
        })
    }

    pub fn logged(name: &'static str, behavior: Behavior, log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior,
            calls: AtomicUsize::new(0),
            log: Some(Arc::clone(log)),
            bundles: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Bundles received as a reasoning backend.
    pub fn bundles(&self) -> Vec<ContextBundle> {
        self.bundles.lock().unwrap().clone()
    }

    async fn respond(&self) -> Result<BackendAnswer, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().unwrap().push(self.name.to_string());
        }
        match &self.behavior {
            Behavior::Answer(text, confidence) => Ok(BackendAnswer::new(*text, *confidence)),
            Behavior::Fail(err) => Err(err.clone()),
            Behavior::Hang => std::future::pending().await,
            Behavior::Slow(delay, text, confidence) => {
                tokio::time::sleep(*delay).await;
                Ok(BackendAnswer::new(*text, *confidence))
            }
        }
    }
}

#[async_trait]
impl InferenceBackend for Scripted {
    async fn invoke(
        &self,
        _request: &InferenceRequest,
        _cancel: CancellationToken,
    ) -> Result<BackendAnswer, BackendError> {
        self.respond().await
    }
}

#[async_trait]
impl ReasoningBackend for Scripted {
    async fn invoke(
        &self,
        request: &ReasoningRequest,
        _cancel: CancellationToken,
    ) -> Result<BackendAnswer, BackendError> {
        self.bundles.lock().unwrap().push(request.bundle.clone());
        self.respond().await
    }
}

/// Context assembler returning one fixed document, or failing.
#[derive(Debug)]
pub struct Assembler {
    fail: bool,
    calls: AtomicUsize,
    log: Option<CallLog>,
}

impl Assembler {
    pub fn ok(log: Option<&CallLog>) -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: AtomicUsize::new(0),
            log: log.map(Arc::clone),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: AtomicUsize::new(0),
            log: None,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextAssembler for Assembler {
    async fn assemble(
        &self,
        _query: &Query,
        _cancel: CancellationToken,
    ) -> Result<ContextBundle, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().unwrap().push("assemble".to_string());
        }
        if self.fail {
            return Err(BackendError::Unavailable("knowledge base offline".into()));
        }
        Ok(ContextBundle {
            documents: vec![ContextDocument {
                source: "runbook".into(),
                content: "service X restarts nightly at 02:00".into(),
            }],
            ..ContextBundle::default()
        })
    }
}

pub fn router(inference: &Arc<Scripted>, reasoning: &Arc<Scripted>) -> EscalationRouter {
    EscalationRouter::builder()
        .inference(inference.clone())
        .reasoning(reasoning.clone())
        .build()
        .unwrap()
}

pub fn router_with_config(
    inference: &Arc<Scripted>,
    reasoning: &Arc<Scripted>,
    config: RouterConfig,
) -> EscalationRouter {
    EscalationRouter::builder()
        .config(config)
        .inference(inference.clone())
        .reasoning(reasoning.clone())
        .build()
        .unwrap()
}

/// Router whose scorer always lands in the high band.
pub fn high_complexity_router(
    inference: &Arc<Scripted>,
    reasoning: &Arc<Scripted>,
) -> EscalationRouter {
    EscalationRouter::builder()
        .inference(inference.clone())
        .reasoning(reasoning.clone())
        .scorer(Arc::new(|_: &Query| ComplexityScore::new(0.9)))
        .build()
        .unwrap()
}
