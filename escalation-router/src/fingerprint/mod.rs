//! Fingerprint Generator: deterministic routing and verification keys.
//!
//! A fingerprint is derived from the canonical form of a query (see
//! [`normalize`]). Two independent BLAKE3 key-derivation contexts produce:
//!
//! - a 64-bit **routing key**, used to address the pattern store;
//! - a 256-bit **verification key**, compared before a cached answer is
//!   trusted so a routing-key collision can never serve the wrong answer.
//!
//! No random seeding is involved: the same normalized input yields the same
//! fingerprint across processes and restarts.

pub mod encoding;
pub mod normalize;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::FingerprintError;
use crate::query::{ContextMap, Query};

pub use normalize::{normalize, NormalizedQuery};

const ROUTING_KEY_CONTEXT: &str = "escalation-router 2026-01 routing key";
const VERIFICATION_KEY_CONTEXT: &str = "escalation-router 2026-01 verification key";

/// Short key used for O(1) pattern store addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingKey(u64);

impl RoutingKey {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encoding::encode_base62(self.0))
    }
}

/// Error parsing a rendered routing key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid routing key: {0:?}")]
pub struct ParseRoutingKeyError(String);

impl FromStr for RoutingKey {
    type Err = ParseRoutingKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        encoding::decode_base62(s.trim())
            .map(Self)
            .ok_or_else(|| ParseRoutingKeyError(s.to_string()))
    }
}

impl Serialize for RoutingKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RoutingKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Long key confirming that a routing-key match is not a collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VerificationKey(blake3::Hash);

impl VerificationKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(blake3::Hash::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl fmt::Display for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.to_hex().as_str())
    }
}

/// Routing key plus verification key for one normalized query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub routing_key: RoutingKey,
    pub verification_key: VerificationKey,
}

impl Fingerprint {
    /// Assemble a fingerprint from raw parts. Used by tests that need to
    /// engineer routing-key collisions.
    pub fn from_parts(routing_key: RoutingKey, verification_key: VerificationKey) -> Self {
        Self {
            routing_key,
            verification_key,
        }
    }

    /// Fingerprint an already-normalized query.
    pub fn of_normalized(normalized: &NormalizedQuery) -> Self {
        let canonical = normalized.canonical();

        let routing = blake3::Hasher::new_derive_key(ROUTING_KEY_CONTEXT)
            .update(canonical.as_bytes())
            .finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&routing.as_bytes()[..8]);

        let verification = blake3::Hasher::new_derive_key(VERIFICATION_KEY_CONTEXT)
            .update(canonical.as_bytes())
            .finalize();

        Self {
            routing_key: RoutingKey(u64::from_le_bytes(head)),
            verification_key: VerificationKey(verification),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.routing_key, &self.verification_key.to_string()[..16])
    }
}

/// Compute the fingerprint of raw text plus context.
///
/// Pure and side-effect free. Fails only when the text is empty after
/// normalization.
pub fn fingerprint(text: &str, context: &ContextMap) -> Result<Fingerprint, FingerprintError> {
    let normalized = normalize(text, context)?;
    Ok(Fingerprint::of_normalized(&normalized))
}

/// Fingerprint a [`Query`].
pub fn fingerprint_query(query: &Query) -> Result<Fingerprint, FingerprintError> {
    fingerprint(query.text(), query.context())
}
