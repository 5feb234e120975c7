//! Keyword-based domain detection for the context completeness check.

use crate::config::DomainRule;
use crate::query::ContextMap;

/// Lowercased alphanumeric words of `text`.
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Rules whose keywords appear as whole words in `text`.
pub fn detect<'a>(text: &str, rules: &'a [DomainRule]) -> Vec<&'a DomainRule> {
    let tokens: Vec<String> = words(text).collect();
    rules
        .iter()
        .filter(|rule| {
            rule.keywords
                .iter()
                .any(|kw| tokens.iter().any(|t| t.eq_ignore_ascii_case(kw)))
        })
        .collect()
}

/// Required attributes of the detected domains that `context` lacks,
/// paired with the total number required.
///
/// Keys are compared case-insensitively; blank values count as missing.
pub fn missing_attributes(rules: &[&DomainRule], context: &ContextMap) -> (Vec<String>, usize) {
    let mut required: Vec<String> = rules
        .iter()
        .flat_map(|r| r.required_context.iter().map(|k| k.to_lowercase()))
        .collect();
    required.sort();
    required.dedup();

    let missing = required
        .iter()
        .filter(|key| {
            !context
                .iter()
                .any(|(k, v)| k.trim().eq_ignore_ascii_case(key) && !v.trim().is_empty())
        })
        .cloned()
        .collect();
    (missing, required.len())
}
