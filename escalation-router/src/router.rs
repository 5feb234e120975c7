//! Escalation Router: owns one query from fingerprint to result.
//!
//! ```text
//! fingerprint -> Tier 1 lookup -hit-> cached answer
//!                     | miss
//!                     v
//!               complexity band -> gate(target) -> Tier 2 -ok-> write-through
//!                     | high              | low confidence / timeout / error
//!                     v                   v
//!               gate(Tier 3, stricter) -> assemble context -> Tier 3 -> write-through
//! ```
//!
//! Tiers only move forward within one dispatch. No error path writes to the
//! pattern store.

use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

use crate::clock::{SharedClock, SystemClock};
use crate::config::{ConfigError, RouterConfig};
use crate::error::{BackendError, RouterError};
use crate::events::{EventBus, RouterEvent, SharedEventBus};
use crate::fingerprint::{fingerprint_query, Fingerprint, RoutingKey};
use crate::gate::{GateResult, QualityGate};
use crate::metrics::{MetricsSnapshot, RouterMetrics};
use crate::query::Query;
use crate::scorer::{ComplexityBand, ComplexityScore, ComplexityScorer, HeuristicScorer};
use crate::store::{
    invalidation_channel, spawn_invalidation_listener, spawn_sweeper, InvalidationSender,
    PatternStore, ResolvedPattern,
};
use crate::tiers::{
    BackendAnswer, CallError, ContextAssembler, ContextBundle, DispatchTrace, EscalationReason,
    EscalationRecord, InferenceBackend, InferenceRequest, NoContextAssembler, ReasoningBackend,
    ReasoningRequest, Tier, WorkerPool,
};

/// What a successful dispatch returns.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub correlation_id: String,
    /// Tier that produced the answer
    pub tier: Tier,
    pub answer: String,
    /// In [0, 1]; always 1.0 for Tier 1
    pub confidence: f32,
    /// Wall-clock time from dispatch to result
    #[serde(rename = "latency_ms", serialize_with = "millis")]
    pub latency: Duration,
    /// The producing tier answered below the acceptance threshold and no
    /// further tier exists.
    pub escalate: bool,
    /// `None` on a Tier 1 hit, where scoring is skipped
    pub complexity: Option<ComplexityScore>,
    pub routing_key: RoutingKey,
    /// Tiers in the order visited
    pub visited: Vec<Tier>,
    pub escalations: Vec<EscalationRecord>,
}

fn millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1_000.0)
}

/// Background tasks started by [`EscalationRouter::spawn_maintenance`].
#[derive(Debug)]
pub struct Maintenance {
    /// Send invalidation notices here
    pub invalidations: InvalidationSender,
    pub sweeper: JoinHandle<()>,
    pub listener: JoinHandle<()>,
}

/// Builder for [`EscalationRouter`].
#[derive(Default)]
pub struct RouterBuilder {
    config: RouterConfig,
    clock: Option<SharedClock>,
    scorer: Option<Arc<dyn ComplexityScorer>>,
    inference: Option<Arc<dyn InferenceBackend>>,
    assembler: Option<Arc<dyn ContextAssembler>>,
    reasoning: Option<Arc<dyn ReasoningBackend>>,
    events: Option<SharedEventBus>,
}

impl RouterBuilder {
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the default [`HeuristicScorer`].
    pub fn scorer(mut self, scorer: Arc<dyn ComplexityScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn inference(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.inference = Some(backend);
        self
    }

    /// Defaults to [`NoContextAssembler`].
    pub fn context_assembler(mut self, assembler: Arc<dyn ContextAssembler>) -> Self {
        self.assembler = Some(assembler);
        self
    }

    pub fn reasoning(mut self, backend: Arc<dyn ReasoningBackend>) -> Self {
        self.reasoning = Some(backend);
        self
    }

    pub fn events(mut self, bus: SharedEventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn build(self) -> Result<EscalationRouter, ConfigError> {
        self.config.validate()?;
        let inference = self
            .inference
            .ok_or(ConfigError::MissingCollaborator("tier-2 inference backend"))?;
        let reasoning = self
            .reasoning
            .ok_or(ConfigError::MissingCollaborator("tier-3 reasoning backend"))?;
        let assembler = self
            .assembler
            .unwrap_or_else(|| Arc::new(NoContextAssembler));
        let scorer = self
            .scorer
            .unwrap_or_else(|| Arc::new(HeuristicScorer::new(self.config.scorer.clone())));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let events = self.events.unwrap_or_else(|| EventBus::new().shared());
        let metrics = Arc::new(RouterMetrics::new());

        let store = Arc::new(
            PatternStore::new(self.config.store.clone(), clock, Arc::clone(&metrics))
                .with_events(Arc::clone(&events)),
        );
        let gate = QualityGate::new(self.config.gate.clone())?;
        let tier2_pool = WorkerPool::new(Tier::Inference, self.config.tiers.tier2_workers);
        let tier3_pool = WorkerPool::new(Tier::Reasoning, self.config.tiers.tier3_workers);

        Ok(EscalationRouter {
            config: self.config,
            store,
            scorer,
            gate,
            inference,
            assembler,
            reasoning,
            tier2_pool,
            tier3_pool,
            metrics,
            events,
        })
    }
}

enum Tier2Outcome {
    Accepted(BackendAnswer),
    Escalate(EscalationReason),
}

/// The orchestrator. Cheap to share behind an `Arc`; `dispatch` takes
/// `&self` and may run concurrently from many tasks.
pub struct EscalationRouter {
    config: RouterConfig,
    store: Arc<PatternStore>,
    scorer: Arc<dyn ComplexityScorer>,
    gate: QualityGate,
    inference: Arc<dyn InferenceBackend>,
    assembler: Arc<dyn ContextAssembler>,
    reasoning: Arc<dyn ReasoningBackend>,
    tier2_pool: WorkerPool,
    tier3_pool: WorkerPool,
    metrics: Arc<RouterMetrics>,
    events: SharedEventBus,
}

impl std::fmt::Debug for EscalationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationRouter")
            .field("entries", &self.store.len())
            .field("tier2_in_flight", &self.tier2_pool.in_flight())
            .field("tier3_in_flight", &self.tier3_pool.in_flight())
            .finish_non_exhaustive()
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

fn dispatch_span(query: &Query) -> Span {
    tracing::info_span!(
        "router.dispatch",
        "correlation_id" = %query.correlation_id(),
        "router.tier" = tracing::field::Empty,
        "router.success" = tracing::field::Empty,
        "router.latency_ms" = tracing::field::Empty,
    )
}

impl EscalationRouter {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<PatternStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<RouterMetrics> {
        &self.metrics
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    /// Start the eviction sweeper and the invalidation listener.
    pub fn spawn_maintenance(&self, feed_capacity: usize, cancel: CancellationToken) -> Maintenance {
        let (invalidations, feed) = invalidation_channel(feed_capacity);
        let sweeper = spawn_sweeper(
            Arc::clone(&self.store),
            self.config.store.sweep_interval(),
            cancel.clone(),
        );
        let listener = spawn_invalidation_listener(Arc::clone(&self.store), feed, cancel);
        Maintenance {
            invalidations,
            sweeper,
            listener,
        }
    }

    /// Route one query to the cheapest tier able to answer it.
    pub async fn dispatch(&self, query: Query) -> Result<ExecutionResult, RouterError> {
        let span = dispatch_span(&query);
        let started = Instant::now();
        let deadline = started + query.timeout();
        self.metrics.record_dispatch();

        let outcome = self
            .run(&query, started, deadline)
            .instrument(span.clone())
            .await;

        span.in_scope(|| match &outcome {
            Ok(result) => {
                span.record("router.tier", result.tier.level());
                span.record("router.success", true);
                span.record("router.latency_ms", result.latency.as_millis() as u64);
                self.metrics.record_resolved(result.tier, result.latency);
                info!(
                    tier = %result.tier,
                    confidence = result.confidence,
                    latency_ms = result.latency.as_secs_f64() * 1_000.0,
                    "dispatch completed"
                );
                self.events.publish(RouterEvent::DispatchCompleted {
                    correlation_id: result.correlation_id.clone(),
                    routing_key: result.routing_key,
                    tier: result.tier,
                    confidence: result.confidence,
                    latency_ms: result.latency.as_secs_f64() * 1_000.0,
                });
            }
            Err(err) => {
                span.record("router.success", false);
                self.record_error(err);
                warn!(kind = err.kind(), error = %err, "dispatch failed");
                self.events.publish(RouterEvent::DispatchFailed {
                    correlation_id: query.correlation_id().to_string(),
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                });
            }
        });
        outcome
    }

    fn record_error(&self, err: &RouterError) {
        match err {
            RouterError::GateRejected { .. } => self.metrics.record_gate_rejection(),
            RouterError::BudgetExceeded { .. } => self.metrics.record_budget_rejection(),
            RouterError::BackendTimeout { .. } => self.metrics.record_timeout(),
            RouterError::BackendError { .. } | RouterError::Failed { .. } => {
                self.metrics.record_failure()
            }
            RouterError::InvalidQuery(_) => {}
        }
    }

    async fn run(
        &self,
        query: &Query,
        started: Instant,
        deadline: Instant,
    ) -> Result<ExecutionResult, RouterError> {
        if query.text().trim().is_empty() {
            return Err(RouterError::InvalidQuery("query text is empty".to_string()));
        }
        let fp = fingerprint_query(query)?;
        let mut trace = DispatchTrace::new();

        // Tier 1
        if let Some(entry) = self.store.lookup(&fp) {
            self.metrics.record_cache_hit();
            let latency = started.elapsed();
            if latency > self.config.tiers.tier1_latency_budget() {
                warn!(?latency, "tier1 hit exceeded its latency budget");
            }
            debug!(routing_key = %fp.routing_key, state = %entry.state, "tier1 hit");
            return Ok(self.result(
                query,
                &fp,
                BackendAnswer {
                    answer: entry.answer,
                    confidence: 1.0,
                },
                started,
                None,
                trace,
            ));
        }
        self.metrics.record_cache_miss();

        let complexity = self.scorer.score(query);
        let band = complexity.band();
        let (target, reason) = match band {
            ComplexityBand::High => (
                Tier::Reasoning,
                EscalationReason::HighComplexity {
                    score: complexity.value(),
                },
            ),
            ComplexityBand::Low | ComplexityBand::Medium => {
                (Tier::Inference, EscalationReason::CacheMiss)
            }
        };
        debug!(score = complexity.value(), ?band, %target, "tier selected");
        self.escalate(&mut trace, query, target, reason);

        let verdict = self.gate.validate(query, target, remaining(deadline));
        if !verdict.proceed {
            return Err(gate_error(target, verdict));
        }

        if target == Tier::Inference {
            match self.run_tier2(query, band, started, deadline).await? {
                Tier2Outcome::Accepted(answer) => {
                    self.store.write_through(
                        &fp,
                        ResolvedPattern::new(answer.answer.clone(), answer.confidence)
                            .from_tier(Tier::Inference)
                            .with_context(query.context()),
                    );
                    return Ok(self.result(query, &fp, answer, started, Some(complexity), trace));
                }
                Tier2Outcome::Escalate(reason) => {
                    self.escalate(&mut trace, query, Tier::Reasoning, reason);
                }
            }

            let verdict = self
                .gate
                .validate(query, Tier::Reasoning, remaining(deadline));
            if !verdict.proceed {
                trace.fail();
                return Err(RouterError::failed(gate_error(Tier::Reasoning, verdict)));
            }
        }

        self.run_tier3(query, &fp, complexity, started, deadline, trace)
            .await
    }

    async fn run_tier2(
        &self,
        query: &Query,
        band: ComplexityBand,
        started: Instant,
        deadline: Instant,
    ) -> Result<Tier2Outcome, RouterError> {
        let call_started = Instant::now();
        let tier_deadline = deadline.min(call_started + self.config.tiers.tier2_timeout());
        let request = InferenceRequest {
            correlation_id: query.correlation_id().to_string(),
            query: query.text().to_string(),
            context: (band == ComplexityBand::Medium).then(|| query.context().clone()),
            timeout: tier_deadline.saturating_duration_since(call_started),
        };
        let backend = Arc::clone(&self.inference);
        let outcome = self
            .tier2_pool
            .run(tier_deadline, move |cancel| async move {
                backend.invoke(&request, cancel).await
            })
            .await;

        let threshold = self.config.tiers.escalation_threshold;
        match outcome {
            Ok(answer) if answer.answer.trim().is_empty() => {
                Ok(Tier2Outcome::Escalate(EscalationReason::BackendFailure {
                    message: BackendError::Declined.to_string(),
                }))
            }
            Ok(answer) if answer.confidence >= threshold => Ok(Tier2Outcome::Accepted(answer)),
            Ok(answer) => Ok(Tier2Outcome::Escalate(EscalationReason::LowConfidence {
                confidence: answer.confidence,
                threshold,
            })),
            Err(CallError::TimedOut) if Instant::now() >= deadline => {
                Err(RouterError::BackendTimeout {
                    tier: Tier::Inference,
                    elapsed: started.elapsed(),
                })
            }
            Err(CallError::TimedOut) => {
                Ok(Tier2Outcome::Escalate(EscalationReason::BackendTimeout {
                    elapsed_ms: call_started.elapsed().as_millis() as u64,
                }))
            }
            Err(CallError::Backend(e)) => {
                debug!(error = %e, kind = e.kind(), "tier2 backend error");
                Ok(Tier2Outcome::Escalate(EscalationReason::BackendFailure {
                    message: e.to_string(),
                }))
            }
        }
    }

    async fn run_tier3(
        &self,
        query: &Query,
        fp: &Fingerprint,
        complexity: ComplexityScore,
        started: Instant,
        deadline: Instant,
        mut trace: DispatchTrace,
    ) -> Result<ExecutionResult, RouterError> {
        let tier_deadline = deadline.min(Instant::now() + self.config.tiers.tier3_timeout());

        // Assembly completes before the reasoning call is issued.
        let assembler = Arc::clone(&self.assembler);
        let owned = query.clone();
        let bundle = match self
            .tier3_pool
            .run(tier_deadline, move |cancel| async move {
                assembler.assemble(&owned, cancel).await
            })
            .await
        {
            Ok(bundle) => bundle,
            Err(CallError::TimedOut) if Instant::now() >= deadline => {
                trace.fail();
                return Err(RouterError::BackendTimeout {
                    tier: Tier::Reasoning,
                    elapsed: started.elapsed(),
                });
            }
            Err(e) => {
                warn!(error = %e, "context assembly failed, reasoning on caller context only");
                ContextBundle::default()
            }
        };
        debug!(documents = bundle.documents.len(), "context assembled");

        let request = ReasoningRequest {
            correlation_id: query.correlation_id().to_string(),
            query: query.text().to_string(),
            caller_context: query.context().clone(),
            bundle,
            timeout: remaining(tier_deadline),
        };
        let backend = Arc::clone(&self.reasoning);
        let outcome = self
            .tier3_pool
            .run(tier_deadline, move |cancel| async move {
                backend.invoke(&request, cancel).await
            })
            .await;

        let cause = match outcome {
            Ok(answer) if !answer.answer.trim().is_empty() => {
                if answer.confidence < self.config.tiers.escalation_threshold {
                    debug!(
                        confidence = answer.confidence,
                        "tier 3 answer below threshold, returned uncached"
                    );
                    return Ok(self.result(query, fp, answer, started, Some(complexity), trace));
                }
                self.store.write_through(
                    fp,
                    ResolvedPattern::new(answer.answer.clone(), answer.confidence)
                        .from_tier(Tier::Reasoning)
                        .with_context(query.context())
                        .with_promotion_credit(1),
                );
                return Ok(self.result(query, fp, answer, started, Some(complexity), trace));
            }
            Ok(_) => RouterError::BackendError {
                tier: Tier::Reasoning,
                source: BackendError::Declined,
            },
            Err(CallError::TimedOut) if Instant::now() >= deadline => {
                trace.fail();
                return Err(RouterError::BackendTimeout {
                    tier: Tier::Reasoning,
                    elapsed: started.elapsed(),
                });
            }
            Err(CallError::TimedOut) => RouterError::BackendTimeout {
                tier: Tier::Reasoning,
                elapsed: started.elapsed(),
            },
            Err(CallError::Backend(source)) => RouterError::BackendError {
                tier: Tier::Reasoning,
                source,
            },
        };
        trace.fail();
        Err(RouterError::failed(cause))
    }

    fn escalate(&self, trace: &mut DispatchTrace, query: &Query, to: Tier, reason: EscalationReason) {
        let Some(from) = trace.current() else {
            return;
        };
        if trace.escalate(to, reason.clone()) {
            self.metrics.record_escalation();
            self.events.publish(RouterEvent::Escalated {
                correlation_id: query.correlation_id().to_string(),
                from,
                to,
                reason,
            });
        }
    }

    fn result(
        &self,
        query: &Query,
        fp: &Fingerprint,
        answer: BackendAnswer,
        started: Instant,
        complexity: Option<ComplexityScore>,
        trace: DispatchTrace,
    ) -> ExecutionResult {
        let tier = trace.current().unwrap_or(Tier::Reasoning);
        let escalate = tier == Tier::Reasoning
            && answer.confidence < self.config.tiers.escalation_threshold;
        let (visited, escalations) = trace.into_parts();
        ExecutionResult {
            correlation_id: query.correlation_id().to_string(),
            tier,
            answer: answer.answer,
            confidence: answer.confidence,
            latency: started.elapsed(),
            escalate,
            complexity,
            routing_key: fp.routing_key,
            visited,
            escalations,
        }
    }
}

/// Map a failed gate to the caller-facing error.
fn gate_error(tier: Tier, verdict: GateResult) -> RouterError {
    if !verdict.safety_violation() && verdict.budget_blocked() {
        return RouterError::BudgetExceeded {
            tier,
            detail: verdict.summary(),
        };
    }
    RouterError::GateRejected {
        reason: verdict.summary(),
        issues: verdict.issues,
    }
}
