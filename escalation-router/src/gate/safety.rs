//! Injection and override detection.
//!
//! Patterns are matched case-insensitively against the query text and every
//! context value in a single `RegexSet` pass. Any finding is a hard fail.

use regex::{Regex, RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Categories of attack patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyCategory {
    /// "ignore previous instructions" and friends
    InstructionOverride,
    /// Attempts to replace the assistant's role
    RoleHijack,
    /// Attempts to read back hidden instructions
    PromptExtraction,
    /// Attempts to switch off the gate itself
    GateBypass,
    /// Known jailbreak personas
    Jailbreak,
    /// Raw chat-template control tokens
    TokenSmuggling,
    /// Operator-supplied pattern
    Custom,
}

impl std::fmt::Display for SafetyCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InstructionOverride => write!(f, "instruction_override"),
            Self::RoleHijack => write!(f, "role_hijack"),
            Self::PromptExtraction => write!(f, "prompt_extraction"),
            Self::GateBypass => write!(f, "gate_bypass"),
            Self::Jailbreak => write!(f, "jailbreak"),
            Self::TokenSmuggling => write!(f, "token_smuggling"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

struct Rule {
    category: SafetyCategory,
    pattern: &'static str,
    reason: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        category: SafetyCategory::InstructionOverride,
        pattern: r"\b(ignore|disregard|forget|override)\b.{0,40}\b(previous|prior|above|earlier|all|your)\b.{0,20}\b(instructions?|rules|prompts?|directions|guidelines)\b",
        reason: "attempts to override prior instructions",
    },
    Rule {
        category: SafetyCategory::RoleHijack,
        pattern: r"\byou\s+are\s+now\b",
        reason: "attempts to reassign the assistant role",
    },
    Rule {
        category: SafetyCategory::RoleHijack,
        pattern: r"\b(act|behave)\s+as\s+(an?\s+)?(unrestricted|unfiltered|uncensored|different)\b",
        reason: "attempts to reassign the assistant role",
    },
    Rule {
        category: SafetyCategory::RoleHijack,
        pattern: r"\bpretend\s+(to\s+be|you\s+are)\b",
        reason: "attempts to reassign the assistant role",
    },
    Rule {
        category: SafetyCategory::PromptExtraction,
        pattern: r"\bsystem\s*prompt\b",
        reason: "references the hidden system prompt",
    },
    Rule {
        category: SafetyCategory::GateBypass,
        pattern: r"\b(bypass|override|disable|skip|circumvent)\b.{0,20}\b(quality\s+gate|gate|safety\s+(checks?|filters?)|guardrails?|content\s+filters?|moderation)\b",
        reason: "attempts to switch off validation",
    },
    Rule {
        category: SafetyCategory::Jailbreak,
        pattern: r"\bjailbreak",
        reason: "jailbreak attempt",
    },
    Rule {
        category: SafetyCategory::Jailbreak,
        pattern: r"\b(developer|dan|god)\s+mode\b",
        reason: "jailbreak persona",
    },
    Rule {
        category: SafetyCategory::TokenSmuggling,
        pattern: r"<\|\s*(im_start|im_end|system|endoftext)\s*\|>",
        reason: "contains chat-template control tokens",
    },
    Rule {
        category: SafetyCategory::TokenSmuggling,
        pattern: r"\[/?INST\]",
        reason: "contains chat-template control tokens",
    },
];

/// One safety hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyFinding {
    pub category: SafetyCategory,
    pub reason: String,
    /// `"text"` or `"context.<key>"`
    pub location: String,
}

/// Compiled safety pattern set.
#[derive(Debug, Clone)]
pub struct SafetyScanner {
    set: RegexSet,
    rules: Vec<(SafetyCategory, String)>,
}

impl SafetyScanner {
    /// Built-in rules plus `extra` operator patterns.
    pub fn new(extra: &[String]) -> Result<Self, ConfigError> {
        let mut patterns: Vec<String> = RULES.iter().map(|r| r.pattern.to_string()).collect();
        let mut rules: Vec<(SafetyCategory, String)> = RULES
            .iter()
            .map(|r| (r.category, r.reason.to_string()))
            .collect();

        for pattern in extra {
            Regex::new(pattern).map_err(|e| ConfigError::BadPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            patterns.push(pattern.clone());
            rules.push((SafetyCategory::Custom, format!("matches `{pattern}`")));
        }

        let set = RegexSetBuilder::new(&patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| ConfigError::BadPattern {
                pattern: "<safety set>".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { set, rules })
    }

    /// Findings for one piece of text, at most one per rule.
    pub fn scan_text(&self, text: &str, location: &str) -> Vec<SafetyFinding> {
        self.set
            .matches(text)
            .into_iter()
            .map(|idx| {
                let (category, reason) = &self.rules[idx];
                SafetyFinding {
                    category: *category,
                    reason: reason.clone(),
                    location: location.to_string(),
                }
            })
            .collect()
    }

    /// Scan query text and context values.
    pub fn scan<'a>(
        &self,
        text: &str,
        context: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Vec<SafetyFinding> {
        let mut findings = self.scan_text(text, "text");
        for (key, value) in context {
            findings.extend(self.scan_text(value, &format!("context.{key}")));
        }
        findings
    }
}
