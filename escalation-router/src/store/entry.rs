//! Pattern entries and their lifecycle rules.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::events::EvictionCause;
use crate::fingerprint::normalize::collapse_whitespace;
use crate::fingerprint::{Fingerprint, RoutingKey, VerificationKey};
use crate::query::ContextMap;
use crate::tiers::Tier;

/// Lifecycle state of a cached answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionState {
    /// Fresh answer, subject to idle eviction
    Provisional,
    /// Reused often enough to be trusted long-term
    Promoted,
    /// Invalidated; never served, removed by the next sweep
    Expired,
}

impl std::fmt::Display for PromotionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provisional => write!(f, "provisional"),
            Self::Promoted => write!(f, "promoted"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// A Tier 2/3 resolution about to be written through to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPattern {
    pub answer: String,
    pub confidence: f32,
    pub source_tier: Option<Tier>,
    /// Normalized context the answer was produced under, kept for class
    /// invalidation.
    pub context: ContextMap,
    /// Hits credited at creation. Tier 3 writes carry one.
    pub promotion_credit: u32,
}

impl ResolvedPattern {
    pub fn new(answer: impl Into<String>, confidence: f32) -> Self {
        Self {
            answer: answer.into(),
            confidence,
            source_tier: None,
            context: ContextMap::new(),
            promotion_credit: 0,
        }
    }

    pub fn from_tier(mut self, tier: Tier) -> Self {
        self.source_tier = Some(tier);
        self
    }

    pub fn with_context(mut self, context: &ContextMap) -> Self {
        self.context = context
            .iter()
            .filter_map(|(k, v)| {
                let key = k.trim().to_lowercase();
                (!key.is_empty()).then(|| (key, collapse_whitespace(v)))
            })
            .collect();
        self
    }

    pub fn with_promotion_credit(mut self, credit: u32) -> Self {
        self.promotion_credit = credit;
        self
    }
}

/// A cached answer and its usage metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternEntry {
    pub routing_key: RoutingKey,
    #[serde(serialize_with = "hex_key")]
    pub verification_key: VerificationKey,
    pub answer: String,
    /// Confidence when the entry was created
    pub confidence: f32,
    pub source_tier: Option<Tier>,
    /// Lifetime hits, promotion credit included
    pub hit_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub state: PromotionState,
    pub context: ContextMap,
    /// Hit timestamps inside the promotion window while provisional
    pub recent_hits: VecDeque<DateTime<Utc>>,
}

fn hex_key<S: serde::Serializer>(key: &VerificationKey, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(key)
}

impl PatternEntry {
    /// New `Provisional` entry. Promotion credit is recorded as hits at
    /// `now`.
    pub fn new(fingerprint: &Fingerprint, resolved: ResolvedPattern, now: DateTime<Utc>) -> Self {
        let credit = resolved.promotion_credit;
        Self {
            routing_key: fingerprint.routing_key,
            verification_key: fingerprint.verification_key,
            answer: resolved.answer,
            confidence: resolved.confidence.clamp(0.0, 1.0),
            source_tier: resolved.source_tier,
            hit_count: u64::from(credit),
            created_at: now,
            last_used: now,
            state: PromotionState::Provisional,
            context: resolved.context,
            recent_hits: std::iter::repeat(now).take(credit as usize).collect(),
        }
    }

    pub fn verifies(&self, fingerprint: &Fingerprint) -> bool {
        self.verification_key == fingerprint.verification_key
    }

    /// Take a newer answer for the same fingerprint, keeping state and hit
    /// history. Promotion credit is only granted at creation.
    pub fn refresh(&mut self, resolved: ResolvedPattern, now: DateTime<Utc>) {
        self.answer = resolved.answer;
        self.confidence = resolved.confidence.clamp(0.0, 1.0);
        self.source_tier = resolved.source_tier;
        self.context = resolved.context;
        self.last_used = now;
    }

    /// Drop hit timestamps older than the window.
    pub fn prune_window(&mut self, now: DateTime<Utc>, window: chrono::Duration) {
        while let Some(&oldest) = self.recent_hits.front() {
            if now - oldest > window {
                self.recent_hits.pop_front();
            } else {
                break;
            }
        }
    }

    /// Register one hit and evaluate promotion.
    ///
    /// Returns the window hit count when this hit promoted the entry.
    /// Expired entries are left untouched.
    pub fn touch(&mut self, now: DateTime<Utc>, config: &StoreConfig) -> Option<usize> {
        if self.state == PromotionState::Expired {
            return None;
        }
        self.hit_count += 1;
        self.last_used = now;
        if self.state != PromotionState::Provisional {
            return None;
        }

        self.recent_hits.push_back(now);
        self.prune_window(now, config.promotion_window());
        let in_window = self.recent_hits.len();
        if in_window >= config.promotion_threshold as usize {
            self.state = PromotionState::Promoted;
            self.recent_hits.clear();
            return Some(in_window);
        }
        None
    }

    /// Whether (and why) this entry should leave the store at `now`.
    ///
    /// Promoted entries are exempt from idle eviction but not from the
    /// age ceiling.
    pub fn eviction_cause(
        &self,
        now: DateTime<Utc>,
        config: &StoreConfig,
    ) -> Option<EvictionCause> {
        if self.state == PromotionState::Expired {
            return Some(EvictionCause::Expired);
        }
        if now - self.created_at > config.max_age() {
            return Some(EvictionCause::MaxAge);
        }
        if self.state == PromotionState::Provisional
            && now - self.last_used > config.idle_ttl()
            && self.hit_count < u64::from(config.promotion_threshold)
        {
            return Some(EvictionCause::Idle);
        }
        None
    }
}
