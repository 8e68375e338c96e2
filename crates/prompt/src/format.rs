//! Output size trimming and format validation.

use cmp_core::error::PromptError;

/// Marker appended when content was cut.
pub const TRUNCATION_MARKER: &str = " ...";

/// Keep at most `max_tokens` whitespace-separated tokens.
///
/// Untouched when `max_tokens <= 0` or the content already fits. Trimmed
/// output is re-joined with single spaces and ends in [`TRUNCATION_MARKER`].
pub fn optimize_tokens(content: &str, max_tokens: i64) -> String {
    let Ok(limit) = usize::try_from(max_tokens) else {
        return content.to_string();
    };
    if limit == 0 {
        return content.to_string();
    }

    let tokens: Vec<&str> = content.split_whitespace().collect();
    if tokens.len() <= limit {
        return content.to_string();
    }
    format!("{}{TRUNCATION_MARKER}", tokens[..limit].join(" "))
}

/// Check `response` against the expected output `format`.
///
/// `json` must parse; every other format (including unknown ones and the
/// empty string) only requires non-blank content.
pub fn validate_format(format: &str, response: &str) -> Result<(), PromptError> {
    let normalized = format.trim().to_lowercase();
    let fail = |reason: String| -> Result<(), PromptError> {
        Err(PromptError::Format {
            format: normalized.clone(),
            reason,
        })
    };

    match normalized.as_str() {
        "json" => match serde_json::from_str::<serde_json::Value>(response) {
            Ok(_) => Ok(()),
            Err(e) => fail(format!("invalid json: {e}")),
        },
        _ if !response.trim().is_empty() => Ok(()),
        "markdown" => fail("empty markdown response".into()),
        "text" | "" => fail("empty response".into()),
        other => fail(format!("empty response for format {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_to_token_budget() {
        let out = optimize_tokens("one two  three\nfour five", 3);
        assert_eq!(out, "one two three ...");
    }

    #[test]
    fn untouched_when_within_budget_or_disabled() {
        let content = "one  two\nthree";
        assert_eq!(optimize_tokens(content, 3), content);
        assert_eq!(optimize_tokens(content, 0), content);
        assert_eq!(optimize_tokens(content, -4), content);
    }

    #[test]
    fn json_validation() {
        assert!(validate_format("json", r#"{"a":1}"#).is_ok());
        assert!(validate_format("JSON ", "[1, 2]").is_ok());
        let err = validate_format("json", "not json").unwrap_err();
        assert!(err.to_string().contains("invalid json"));
    }

    #[test]
    fn non_json_formats_require_content() {
        assert!(validate_format("markdown", "# Title\nBody").is_ok());
        assert!(validate_format("text", "plain").is_ok());
        assert!(validate_format("", "plain").is_ok());
        assert!(validate_format("yaml", "a: 1").is_ok());

        assert!(validate_format("markdown", "").unwrap_err().to_string().contains("empty markdown"));
        assert!(validate_format("text", "  \n").is_err());
        assert!(validate_format("", "").is_err());
        assert!(validate_format("yaml", " ").unwrap_err().to_string().contains("format yaml"));
    }
}
