//! Prompt-injection risk classification.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRisk {
    Low,
    Medium,
    High,
}

impl PromptRisk {
    pub fn as_str(self) -> &'static str {
        match self {
            PromptRisk::Low => "low",
            PromptRisk::Medium => "medium",
            PromptRisk::High => "high",
        }
    }
}

impl std::fmt::Display for PromptRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assigns an injection risk to user input plus any extra signal strings.
pub trait RiskClassifier: Send + Sync {
    fn classify(&self, text: &str, extras: &[String]) -> PromptRisk;
}

static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // ignore previous instructions
        r"(?i)ignore\s+(previous|prior)\s+(instructions|context|rules)",
        // reveal the system prompt
        r"(?i)(reveal|show)\s+(system\s+prompt|hidden\s+prompt)",
        // authority spoofing
        r"(?i)(as\s+an?\s+admin|as\s+your\s+manager|override\s+policy)",
        // policy bypass
        r"(?i)(disregard|bypass|break)\s+(rules|policy|guardrails)",
        // exfiltration
        r"(?i)(leak|dump|exfiltrate)\s+(data|secrets|keys|passwords)",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("static injection pattern"))
    .collect()
});

/// Counts how many independent heuristics fire: none is low, one is medium,
/// two or more is high.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicRiskClassifier;

impl HeuristicRiskClassifier {
    /// Number of heuristics matching the combined input.
    pub fn matches(&self, text: &str, extras: &[String]) -> usize {
        let combined = format!("{text}\n{}", extras.join("\n"))
            .trim()
            .to_lowercase();
        INJECTION_PATTERNS
            .iter()
            .filter(|re| re.is_match(&combined))
            .count()
    }
}

impl RiskClassifier for HeuristicRiskClassifier {
    fn classify(&self, text: &str, extras: &[String]) -> PromptRisk {
        match self.matches(text, extras) {
            0 => PromptRisk::Low,
            1 => PromptRisk::Medium,
            _ => PromptRisk::High,
        }
    }
}

/// Classify with the built-in heuristics.
pub fn classify_prompt_risk(text: &str, extras: &[String]) -> PromptRisk {
    HeuristicRiskClassifier.classify(text, extras)
}

const NEUTRALIZED: &[&str] = &[
    "Ignore previous",
    "ignore previous",
    "Disregard",
    "disregard",
    "bypass",
    "Break",
    "break",
];

/// Replace common model-directed verbs with `[user]`. Substring based, so
/// words that merely contain them (`breakfast`) are rewritten too.
pub fn sanitize_user_input(text: &str) -> String {
    NEUTRALIZED
        .iter()
        .fold(text.to_string(), |acc, from| acc.replace(from, "[user]"))
}
