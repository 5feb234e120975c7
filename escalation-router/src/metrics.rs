//! Router counters and the pull-style metrics snapshot.
//!
//! All counters are relaxed atomics: the hot path never takes a lock to
//! record a metric, and a snapshot is only approximately consistent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tiers::Tier;

#[derive(Debug, Default)]
struct TierCounters {
    resolved: AtomicU64,
    latency_us: AtomicU64,
}

/// Live counters shared by the router and the pattern store.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    dispatches: AtomicU64,
    tiers: [TierCounters; 3],
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    collisions: AtomicU64,
    collision_evictions: AtomicU64,
    cache_writes: AtomicU64,
    promotions: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    gate_rejections: AtomicU64,
    budget_rejections: AtomicU64,
    escalations: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatch(&self) {
        bump(&self.dispatches);
    }

    /// A dispatch answered at `tier` after `latency`.
    pub fn record_resolved(&self, tier: Tier, latency: Duration) {
        let counters = &self.tiers[tier.index()];
        bump(&counters.resolved);
        counters
            .latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        bump(&self.cache_hits);
    }

    pub fn record_cache_miss(&self) {
        bump(&self.cache_misses);
    }

    /// Routing key matched but the verification key did not.
    pub fn record_collision(&self) {
        bump(&self.collisions);
    }

    /// A write replaced an entry with a different verification key.
    pub fn record_collision_eviction(&self) {
        bump(&self.collision_evictions);
    }

    pub fn record_cache_write(&self) {
        bump(&self.cache_writes);
    }

    pub fn record_promotion(&self) {
        bump(&self.promotions);
    }

    pub fn record_evictions(&self, n: u64) {
        self.evictions.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_invalidations(&self, n: u64) {
        self.invalidations.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_gate_rejection(&self) {
        bump(&self.gate_rejections);
    }

    pub fn record_budget_rejection(&self) {
        bump(&self.budget_rejections);
    }

    pub fn record_escalation(&self) {
        bump(&self.escalations);
    }

    pub fn record_failure(&self) {
        bump(&self.failures);
    }

    pub fn record_timeout(&self) {
        bump(&self.timeouts);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let tiers = Tier::ALL
            .iter()
            .map(|&tier| {
                let c = &self.tiers[tier.index()];
                let resolved = load(&c.resolved);
                TierSnapshot {
                    tier,
                    resolved,
                    avg_latency_ms: ratio(load(&c.latency_us), resolved) / 1_000.0,
                }
            })
            .collect();

        let hits = load(&self.cache_hits);
        let misses = load(&self.cache_misses);
        let writes = load(&self.cache_writes);
        let promotions = load(&self.promotions);

        MetricsSnapshot {
            dispatches: load(&self.dispatches),
            tiers,
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_ratio: ratio(hits, hits + misses),
            cache_writes: writes,
            promotions,
            promotion_rate: ratio(promotions, writes),
            collisions: load(&self.collisions),
            collision_evictions: load(&self.collision_evictions),
            evictions: load(&self.evictions),
            invalidations: load(&self.invalidations),
            gate_rejections: load(&self.gate_rejections),
            budget_rejections: load(&self.budget_rejections),
            escalations: load(&self.escalations),
            failures: load(&self.failures),
            timeouts: load(&self.timeouts),
        }
    }
}

/// Per-tier slice of a [`MetricsSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSnapshot {
    pub tier: Tier,
    /// Dispatches answered at this tier
    pub resolved: u64,
    pub avg_latency_ms: f64,
}

/// Point-in-time copy of the router counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub dispatches: u64,
    pub tiers: Vec<TierSnapshot>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// hits / (hits + misses)
    pub cache_hit_ratio: f64,
    pub cache_writes: u64,
    pub promotions: u64,
    /// promotions / cache writes
    pub promotion_rate: f64,
    pub collisions: u64,
    pub collision_evictions: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub gate_rejections: u64,
    pub budget_rejections: u64,
    pub escalations: u64,
    pub failures: u64,
    pub timeouts: u64,
}

impl MetricsSnapshot {
    pub fn tier(&self, tier: Tier) -> Option<&TierSnapshot> {
        self.tiers.iter().find(|t| t.tier == tier)
    }

    pub fn resolved_at(&self, tier: Tier) -> u64 {
        self.tier(tier).map_or(0, |t| t.resolved)
    }
}
