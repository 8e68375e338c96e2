//! Heuristic detection and redaction of personal data.

use regex_lite::Regex;
use std::sync::LazyLock;

pub const EMAIL_PLACEHOLDER: &str = "[REDACTED_EMAIL]";
pub const PHONE_PLACEHOLDER: &str = "[REDACTED_PHONE]";
pub const SSN_PLACEHOLDER: &str = "[REDACTED_SSN]";

/// Finds and masks personal data in free text.
pub trait PiiDetector: Send + Sync {
    fn detect(&self, text: &str) -> bool;
    fn redact(&self, text: &str) -> String;
}

struct PiiPatterns {
    email: Regex,
    phone: Regex,
    ssn: Regex,
}

static PATTERNS: LazyLock<PiiPatterns> = LazyLock::new(|| PiiPatterns {
    email: Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}").expect("static email pattern"),
    phone: Regex::new(r"\+?\d[\d\s-]{7,}\d").expect("static phone pattern"),
    ssn: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("static ssn pattern"),
});

/// Email addresses, phone-like digit runs and US SSNs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexPiiDetector;

impl PiiDetector for RegexPiiDetector {
    fn detect(&self, text: &str) -> bool {
        let p = &*PATTERNS;
        p.email.is_match(text) || p.phone.is_match(text) || p.ssn.is_match(text)
    }

    /// SSNs are masked before phone numbers, which would otherwise swallow them.
    fn redact(&self, text: &str) -> String {
        let p = &*PATTERNS;
        let out = p.ssn.replace_all(text, SSN_PLACEHOLDER);
        let out = p.email.replace_all(&out, EMAIL_PLACEHOLDER);
        p.phone.replace_all(&out, PHONE_PLACEHOLDER).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_each_class() {
        let d = RegexPiiDetector;
        assert!(d.detect("mail me at Jane.Doe@Example.COM"));
        assert!(d.detect("call +1 555 123 4567"));
        assert!(d.detect("ssn 123-45-6789"));
        assert!(!d.detect("order 1234 shipped in 3-5 days"));
    }

    #[test]
    fn redacts_with_typed_placeholders() {
        let d = RegexPiiDetector;
        assert_eq!(
            d.redact("jane@example.com / 555-123-4567 / 123-45-6789"),
            "[REDACTED_EMAIL] / [REDACTED_PHONE] / [REDACTED_SSN]"
        );
    }

    #[test]
    fn clean_text_untouched() {
        assert_eq!(RegexPiiDetector.redact("no personal data"), "no personal data");
    }
}
