//! Request policy: out-of-band actions, PII handling and citation rules.

use cmp_core::PolicyViolation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

pub const OOB_ACTIONS_ENV: &str = "CMP_OOB_REQUIRED_ACTIONS";
pub const PII_MODE_ENV: &str = "CMP_PII_MODE";

/// Citation markers used when none are configured.
pub const DEFAULT_CITATION_MARKERS: &[&str] = &["source:", "sources:", "[source"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiiMode {
    #[default]
    Off,
    Redact,
    Block,
}

impl FromStr for PiiMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(PiiMode::Off),
            "redact" => Ok(PiiMode::Redact),
            "block" => Ok(PiiMode::Block),
            other => Err(format!("unknown PII mode '{other}'")),
        }
    }
}

/// Gating rules applied around every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Actions that need confirmation outside the chat flow.
    pub require_oob: BTreeSet<String>,
    /// Responses built from memory results must cite them.
    pub no_unsupported_claims: bool,
    pub pii_mode: PiiMode,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            require_oob: ["data_change", "account_action"]
                .into_iter()
                .map(String::from)
                .collect(),
            no_unsupported_claims: true,
            pii_mode: PiiMode::Off,
        }
    }
}

impl Policy {
    /// Overlay `CMP_OOB_REQUIRED_ACTIONS` (replaces the action set) and
    /// `CMP_PII_MODE` (ignored unless `off`, `redact` or `block`).
    pub fn merge_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(OOB_ACTIONS_ENV).filter(|v| !v.is_empty()) {
            self.require_oob = v
                .split(',')
                .filter(|a| !a.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(mode) = lookup(PII_MODE_ENV).and_then(|v| v.parse().ok()) {
            self.pii_mode = mode;
        }
        self
    }

    pub fn requires_out_of_band(&self, action: &str) -> bool {
        self.require_oob.contains(action)
    }

    /// Reject actions that need out-of-band confirmation.
    pub fn check_action(&self, action: &str) -> Result<(), PolicyViolation> {
        if self.requires_out_of_band(action) {
            return Err(PolicyViolation::OutOfBandRequired {
                action: action.to_string(),
            });
        }
        Ok(())
    }
}

/// Recognizes citations of memory sources in rendered responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationPolicy {
    markers: Vec<String>,
}

impl Default for CitationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CITATION_MARKERS.iter().copied())
    }
}

impl CitationPolicy {
    /// Markers match case-insensitively; blank markers are dropped.
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.as_ref().trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    pub fn is_cited(&self, response: &str) -> bool {
        let lower = response.to_lowercase();
        self.markers.iter().any(|m| lower.contains(m.as_str()))
    }

    /// A response drawing on `sources` memory results must carry a marker.
    pub fn check(&self, response: &str, sources: usize) -> Result<(), PolicyViolation> {
        if sources == 0 || self.is_cited(response) {
            return Ok(());
        }
        Err(PolicyViolation::MissingCitation { sources })
    }
}
