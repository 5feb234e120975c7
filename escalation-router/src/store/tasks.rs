//! Background work for the pattern store: the periodic eviction sweep and
//! the inbound invalidation feed.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::PatternStore;
use crate::fingerprint::{fingerprint, RoutingKey};
use crate::query::ContextMap;

/// Notice from an external collaborator that cached knowledge changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Invalidation {
    /// One entry by rendered routing key
    RoutingKey { routing_key: RoutingKey },
    /// Every entry created under `key = value`
    Attribute { key: String, value: String },
    /// The entry a query would hit
    Query {
        text: String,
        #[serde(default)]
        context: ContextMap,
    },
}

pub type InvalidationSender = mpsc::Sender<Invalidation>;

/// Bounded invalidation feed.
pub fn invalidation_channel(capacity: usize) -> (InvalidationSender, mpsc::Receiver<Invalidation>) {
    mpsc::channel(capacity.max(1))
}

impl PatternStore {
    /// Apply one notice. Returns how many entries were expired.
    pub fn apply(&self, notice: &Invalidation) -> usize {
        match notice {
            Invalidation::RoutingKey { routing_key } => usize::from(self.invalidate(*routing_key)),
            Invalidation::Attribute { key, value } => self.invalidate_by_attribute(key, value),
            Invalidation::Query { text, context } => match fingerprint(text, context) {
                Ok(fp) => usize::from(self.invalidate_fingerprint(&fp)),
                Err(e) => {
                    warn!(error = %e, "ignoring invalidation for unusable query");
                    0
                }
            },
        }
    }
}

/// Run [`PatternStore::sweep`] every `interval` until `cancel` fires.
pub fn spawn_sweeper(
    store: Arc<PatternStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = store.sweep();
                    if report.removed() > 0 {
                        debug!(
                            expired = report.expired,
                            idle = report.idle,
                            max_age = report.max_age,
                            remaining = report.remaining,
                            "pattern store sweep"
                        );
                    }
                }
            }
        }
        debug!("sweeper stopped");
    })
}

/// Consume the invalidation feed until it closes or `cancel` fires.
pub fn spawn_invalidation_listener(
    store: Arc<PatternStore>,
    mut feed: mpsc::Receiver<Invalidation>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                notice = feed.recv() => match notice {
                    Some(notice) => {
                        let count = store.apply(&notice);
                        info!(?notice, count, "invalidation applied");
                    }
                    None => break,
                },
            }
        }
        debug!("invalidation listener stopped");
    })
}
