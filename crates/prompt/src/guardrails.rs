//! Context-driven checks on actions and rendered responses.
//!
//! Tone and temperature are advisory and not enforced here.

use std::collections::HashSet;

use cmp_core::context::Context;
use cmp_core::error::{PolicyViolation, PromptError};

use crate::format::{optimize_tokens, validate_format};

/// Allow `action` only if the context's role lists it (case-insensitive).
/// An empty action is always allowed.
pub fn validate_capabilities(ctx: &Context, action: &str) -> Result<(), PolicyViolation> {
    if action.is_empty()
        || ctx
            .role
            .capabilities
            .iter()
            .any(|cap| cap.eq_ignore_ascii_case(action))
    {
        return Ok(());
    }
    Err(PolicyViolation::CapabilityDenied {
        action: action.to_string(),
    })
}

/// Trim to the context's token ceiling, then validate its output format.
pub fn enforce_guardrails(ctx: &Context, response: &str) -> Result<String, PromptError> {
    let trimmed = optimize_tokens(response, ctx.guardrails.max_tokens);
    validate_format(&ctx.guardrails.format, &trimmed)?;
    Ok(trimmed)
}

/// Lexical drift of `response` from the memory it was built on:
/// `1 - max Jaccard similarity` over lowercase alphanumeric tokens. `None`
/// when there are no sources to compare against.
pub fn grounding_drift<S: AsRef<str>>(response: &str, sources: &[S]) -> Option<f64> {
    if sources.is_empty() {
        return None;
    }
    let answer = word_set(response);
    let best = sources
        .iter()
        .map(|s| jaccard(&answer, &word_set(s.as_ref())))
        .fold(0.0_f64, f64::max);
    Some(1.0 - best)
}

fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    shared as f64 / (a.len() + b.len() - shared) as f64
}
