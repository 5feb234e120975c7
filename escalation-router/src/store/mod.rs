//! Pattern Store: verified answer cache with promotion and eviction.
//!
//! Entries live in a sharded concurrent map keyed by routing key. Reads of
//! unrelated keys never contend, and writes to one key are serialized by
//! its shard lock. Promotion is evaluated inline on every hit; idle and
//! age eviction run from the background sweeper in [`tasks`], with a lazy
//! check on lookup so a stale entry is never served between sweeps.
//!
//! The store is the only component that mutates entries. Lookups hand out
//! clones.

pub mod entry;
pub mod tasks;

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::StoreConfig;
use crate::events::{EvictionCause, RouterEvent, SharedEventBus};
use crate::fingerprint::normalize::collapse_whitespace;
use crate::fingerprint::{Fingerprint, RoutingKey};
use crate::metrics::RouterMetrics;
use crate::tiers::Tier;

pub use entry::{PatternEntry, PromotionState, ResolvedPattern};
pub use tasks::{
    invalidation_channel, spawn_invalidation_listener, spawn_sweeper, Invalidation,
    InvalidationSender,
};

/// Entry counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub entries: usize,
    pub provisional: usize,
    pub promoted: usize,
    pub expired: usize,
}

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub expired: usize,
    pub idle: usize,
    pub max_age: usize,
    /// Entries left after the sweep
    pub remaining: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.expired + self.idle + self.max_age
    }
}

enum Lookup {
    Hit(PatternEntry),
    Collision,
    Stale(EvictionCause),
}

/// Concurrent cache of verified answers.
#[derive(Debug)]
pub struct PatternStore {
    entries: DashMap<RoutingKey, PatternEntry>,
    config: StoreConfig,
    clock: SharedClock,
    metrics: Arc<RouterMetrics>,
    events: Option<SharedEventBus>,
}

impl PatternStore {
    pub fn new(config: StoreConfig, clock: SharedClock, metrics: Arc<RouterMetrics>) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            clock,
            metrics,
            events: None,
        }
    }

    /// Publish lifecycle events on `bus`.
    pub fn with_events(mut self, bus: SharedEventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn publish(&self, event: RouterEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Verified lookup without touching usage metadata.
    ///
    /// A routing-key match whose verification key differs is a collision:
    /// it is counted and reported as a miss. Expired or stale entries are
    /// misses too, and stale ones are dropped on the spot.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<PatternEntry> {
        let now = self.clock.now();
        let verdict = {
            let entry = self.entries.get(&fingerprint.routing_key)?;
            if !entry.verifies(fingerprint) {
                Lookup::Collision
            } else if let Some(cause) = entry.eviction_cause(now, &self.config) {
                Lookup::Stale(cause)
            } else {
                Lookup::Hit(entry.clone())
            }
        };
        self.resolve(fingerprint, verdict)
    }

    /// Verified lookup that also records the hit, as one atomic step.
    ///
    /// Returns the entry as it stands after the hit, which may have just
    /// been promoted.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<PatternEntry> {
        let now = self.clock.now();
        let mut promoted = None;
        let verdict = {
            let mut entry = self.entries.get_mut(&fingerprint.routing_key)?;
            if !entry.verifies(fingerprint) {
                Lookup::Collision
            } else if let Some(cause) = entry.eviction_cause(now, &self.config) {
                Lookup::Stale(cause)
            } else {
                promoted = entry.touch(now, &self.config);
                Lookup::Hit(entry.clone())
            }
        };
        if let Some(hits) = promoted {
            self.on_promoted(fingerprint.routing_key, hits);
        }
        self.resolve(fingerprint, verdict)
    }

    fn resolve(&self, fingerprint: &Fingerprint, verdict: Lookup) -> Option<PatternEntry> {
        match verdict {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Collision => {
                self.metrics.record_collision();
                warn!(
                    routing_key = %fingerprint.routing_key,
                    "routing key collision, treating as miss"
                );
                self.publish(RouterEvent::CollisionDetected {
                    routing_key: fingerprint.routing_key,
                });
                None
            }
            Lookup::Stale(cause) => {
                let now = self.clock.now();
                let removed = self
                    .entries
                    .remove_if(&fingerprint.routing_key, |_, e| {
                        e.verifies(fingerprint) && e.eviction_cause(now, &self.config).is_some()
                    })
                    .is_some();
                if removed {
                    self.on_evicted(fingerprint.routing_key, cause);
                }
                None
            }
        }
    }

    /// Insert as `Provisional`, replacing whatever the routing key held.
    pub fn put(&self, fingerprint: &Fingerprint, answer: impl Into<String>, confidence: f32) {
        let resolved = ResolvedPattern::new(answer, confidence);
        let source_tier = resolved.source_tier;
        let entry = PatternEntry::new(fingerprint, resolved, self.clock.now());
        let previous = self.entries.insert(fingerprint.routing_key, entry);
        self.on_stored(fingerprint, previous, source_tier, PromotionState::Provisional);
    }

    /// Write a Tier 2/3 resolution.
    ///
    /// A live entry for the same fingerprint keeps its state and hit
    /// history and only takes the new answer, so two racing dispatches of
    /// one query cannot reset a promotion in progress. Anything else under
    /// the routing key is replaced by a fresh `Provisional` entry; a live
    /// entry under a different verification key is evicted (newest write
    /// wins).
    pub fn write_through(&self, fingerprint: &Fingerprint, resolved: ResolvedPattern) {
        let now = self.clock.now();
        let source_tier = resolved.source_tier;
        let (previous, state) = match self.entries.entry(fingerprint.routing_key) {
            Entry::Occupied(mut slot) => {
                let live = slot.get().verifies(fingerprint)
                    && slot.get().eviction_cause(now, &self.config).is_none();
                if live {
                    let entry = slot.get_mut();
                    entry.refresh(resolved, now);
                    (None, entry.state)
                } else {
                    let previous = slot.insert(PatternEntry::new(fingerprint, resolved, now));
                    (Some(previous), PromotionState::Provisional)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(PatternEntry::new(fingerprint, resolved, now));
                (None, PromotionState::Provisional)
            }
        };
        self.on_stored(fingerprint, previous, source_tier, state);
    }

    fn on_stored(
        &self,
        fingerprint: &Fingerprint,
        previous: Option<PatternEntry>,
        source_tier: Option<Tier>,
        state: PromotionState,
    ) {
        self.metrics.record_cache_write();
        if let Some(prev) = previous {
            if !prev.verifies(fingerprint) && prev.state != PromotionState::Expired {
                self.metrics.record_collision_eviction();
                warn!(
                    routing_key = %fingerprint.routing_key,
                    "collision: replacing entry with a different verification key"
                );
                self.publish(RouterEvent::Evicted {
                    routing_key: fingerprint.routing_key,
                    cause: EvictionCause::Collision,
                });
            }
        }

        debug!(routing_key = %fingerprint.routing_key, ?source_tier, %state, "pattern stored");
        self.publish(RouterEvent::PatternStored {
            routing_key: fingerprint.routing_key,
            source_tier,
            state,
        });
    }

    /// Record a hit by routing key and evaluate promotion.
    ///
    /// Returns the entry's state afterwards, or `None` when the key is
    /// absent. Hits on an `Expired` entry change nothing.
    pub fn record_hit(&self, routing_key: RoutingKey) -> Option<PromotionState> {
        let now = self.clock.now();
        let (state, promoted) = {
            let mut entry = self.entries.get_mut(&routing_key)?;
            let promoted = entry.touch(now, &self.config);
            (entry.state, promoted)
        };
        if let Some(hits) = promoted {
            self.on_promoted(routing_key, hits);
        }
        Some(state)
    }

    fn on_promoted(&self, routing_key: RoutingKey, hits_in_window: usize) {
        self.metrics.record_promotion();
        info!(%routing_key, hits_in_window, "pattern promoted");
        self.publish(RouterEvent::Promoted {
            routing_key,
            hits_in_window,
        });
    }

    fn on_evicted(&self, routing_key: RoutingKey, cause: EvictionCause) {
        self.metrics.record_evictions(1);
        debug!(%routing_key, ?cause, "pattern evicted");
        self.publish(RouterEvent::Evicted { routing_key, cause });
    }

    /// Force an entry to `Expired`.
    ///
    /// Returns whether anything changed: invalidating a missing or
    /// already-expired entry is a no-op.
    pub fn invalidate(&self, routing_key: RoutingKey) -> bool {
        let changed = match self.entries.get_mut(&routing_key) {
            Some(mut entry) if entry.state != PromotionState::Expired => {
                entry.state = PromotionState::Expired;
                true
            }
            _ => false,
        };
        if changed {
            self.metrics.record_invalidations(1);
            debug!(%routing_key, "pattern invalidated");
            self.publish(RouterEvent::Invalidated { routing_key });
        }
        changed
    }

    /// Expire the entry for `fingerprint` only if its verification key
    /// matches.
    pub fn invalidate_fingerprint(&self, fingerprint: &Fingerprint) -> bool {
        let matches = self
            .entries
            .get(&fingerprint.routing_key)
            .is_some_and(|e| e.verifies(fingerprint));
        matches && self.invalidate(fingerprint.routing_key)
    }

    /// Expire every live entry created under context attribute
    /// `key = value`. Returns how many were expired.
    pub fn invalidate_by_attribute(&self, key: &str, value: &str) -> usize {
        let key = key.trim().to_lowercase();
        let value = collapse_whitespace(value);
        let mut expired = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if entry.state != PromotionState::Expired
                && entry.context.get(&key).is_some_and(|v| *v == value)
            {
                entry.state = PromotionState::Expired;
                expired.push(*entry.key());
            }
        }

        if !expired.is_empty() {
            self.metrics.record_invalidations(expired.len() as u64);
            info!(%key, %value, count = expired.len(), "class invalidation");
            for routing_key in &expired {
                self.publish(RouterEvent::Invalidated {
                    routing_key: *routing_key,
                });
            }
        }
        expired.len()
    }

    /// Remove expired, idle and over-age entries.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut evicted = Vec::new();
        self.entries
            .retain(|key, entry| match entry.eviction_cause(now, &self.config) {
                Some(cause) => {
                    evicted.push((*key, cause));
                    false
                }
                None => true,
            });

        let mut report = SweepReport {
            remaining: self.entries.len(),
            ..SweepReport::default()
        };
        for &(routing_key, cause) in &evicted {
            match cause {
                EvictionCause::Expired => report.expired += 1,
                EvictionCause::Idle => report.idle += 1,
                EvictionCause::MaxAge => report.max_age += 1,
                EvictionCause::Collision => {}
            }
            self.publish(RouterEvent::Evicted { routing_key, cause });
        }
        if !evicted.is_empty() {
            self.metrics.record_evictions(evicted.len() as u64);
        }
        report
    }

    /// Raw entry by routing key, whatever its state. For inspection only.
    pub fn entry(&self, routing_key: RoutingKey) -> Option<PatternEntry> {
        self.entries.get(&routing_key).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for entry in self.entries.iter() {
            stats.entries += 1;
            match entry.state {
                PromotionState::Provisional => stats.provisional += 1,
                PromotionState::Promoted => stats.promoted += 1,
                PromotionState::Expired => stats.expired += 1,
            }
        }
        stats
    }
}
