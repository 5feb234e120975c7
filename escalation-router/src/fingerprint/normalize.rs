//! Query canonicalization.
//!
//! Text is lowercased with whitespace runs collapsed to a single space.
//! Context keys are trimmed and lowercased, values have whitespace
//! collapsed; the map is re-sorted after key normalization so attribute
//! order never leaks into the fingerprint.

use crate::error::FingerprintError;
use crate::query::ContextMap;

/// A query reduced to its canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    pub text: String,
    pub context: ContextMap,
}

impl NormalizedQuery {
    /// Length-prefixed canonical encoding fed to the hashers.
    ///
    /// Every field is written as `<tag><byte-len>:<bytes>` so no choice of
    /// text or attribute values can make two different inputs encode alike.
    pub fn canonical(&self) -> String {
        let mut out = String::with_capacity(self.text.len() + 32 * (self.context.len() + 1));
        push_field(&mut out, 'q', &self.text);
        for (key, value) in &self.context {
            push_field(&mut out, 'k', key);
            push_field(&mut out, 'v', value);
        }
        out
    }
}

fn push_field(out: &mut String, tag: char, value: &str) {
    out.push(tag);
    out.push_str(&value.len().to_string());
    out.push(':');
    out.push_str(value);
}

/// Collapse whitespace runs and trim.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonicalize raw text and context.
pub fn normalize(text: &str, context: &ContextMap) -> Result<NormalizedQuery, FingerprintError> {
    let text = collapse_whitespace(text).to_lowercase();
    if text.is_empty() {
        return Err(FingerprintError::EmptyQuery);
    }

    let context = context
        .iter()
        .filter_map(|(k, v)| {
            let key = k.trim().to_lowercase();
            if key.is_empty() {
                None
            } else {
                Some((key, collapse_whitespace(v)))
            }
        })
        .collect();

    Ok(NormalizedQuery { text, context })
}
