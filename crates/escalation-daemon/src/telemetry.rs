//! Logging setup and the periodic reporters.
//!
//! Logs go to stderr; stdout carries only protocol responses.

use std::sync::Arc;
use std::time::Duration;

use escalation_router::{EscalationRouter, RouterEvent, SharedEventBus, Tier};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Log a metrics snapshot every `interval` until `cancel` fires.
pub fn spawn_metrics_reporter(
    router: Arc<EscalationRouter>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let m = router.snapshot();
                    let store = router.store().stats();
                    info!(
                        dispatches = m.dispatches,
                        tier1 = m.resolved_at(Tier::Deterministic),
                        tier2 = m.resolved_at(Tier::Inference),
                        tier3 = m.resolved_at(Tier::Reasoning),
                        cache_hit_ratio = m.cache_hit_ratio,
                        promotion_rate = m.promotion_rate,
                        collisions = m.collisions,
                        gate_rejections = m.gate_rejections,
                        failures = m.failures,
                        entries = store.entries,
                        promoted = store.promoted,
                        "router metrics"
                    );
                }
            }
        }
    })
}

/// Mirror lifecycle events into the log at debug level.
pub fn spawn_event_logger(bus: SharedEventBus, cancel: CancellationToken) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event logger lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

fn log_event(event: &RouterEvent) {
    match event {
        RouterEvent::Escalated {
            correlation_id,
            from,
            to,
            reason,
        } => debug!(%correlation_id, %from, %to, %reason, "escalated"),
        RouterEvent::Promoted {
            routing_key,
            hits_in_window,
        } => debug!(%routing_key, hits_in_window, "promoted"),
        RouterEvent::CollisionDetected { routing_key } => {
            debug!(%routing_key, "collision")
        }
        other => debug!(event = other.event_type(), "router event"),
    }
}
