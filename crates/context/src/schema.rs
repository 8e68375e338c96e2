//! Lightweight structural check run on a candidate file before merging.

use serde_yaml::Value;

/// Ensure the raw document carries `name`, `version` and `role.persona` as
/// non-empty strings.
pub fn validate_raw(bytes: &[u8]) -> Result<(), String> {
    let doc: Value = serde_yaml::from_slice(bytes).map_err(|e| format!("invalid YAML: {e}"))?;

    require_string(&doc, "name", "name")?;
    require_string(&doc, "version", "version")?;

    let role = doc
        .get("role")
        .filter(|r| r.is_mapping())
        .ok_or("field 'role' is required and must be an object")?;
    require_string(role, "persona", "role.persona")
}

fn require_string(doc: &Value, key: &str, label: &str) -> Result<(), String> {
    match doc.get(key).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(()),
        _ => Err(format!(
            "field '{label}' is required and must be a non-empty string"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_document_passes() {
        let src = b"name: Foo\nversion: '1.0.0'\nrole:\n  persona: Helper\n";
        assert!(validate_raw(src).is_ok());
    }

    #[test]
    fn numeric_version_is_rejected() {
        let src = b"name: Foo\nversion: 1.0\nrole:\n  persona: Helper\n";
        let err = validate_raw(src).unwrap_err();
        assert!(err.contains("'version'"));
    }

    #[test]
    fn missing_role_is_rejected() {
        let err = validate_raw(b"name: Foo\nversion: '1'\n").unwrap_err();
        assert!(err.contains("'role'"));
    }

    #[test]
    fn empty_persona_is_rejected() {
        let src = b"name: Foo\nversion: '1'\nrole:\n  persona: ''\n";
        assert!(validate_raw(src).unwrap_err().contains("role.persona"));
    }

    #[test]
    fn broken_yaml_is_rejected() {
        assert!(validate_raw(b"name: [unclosed").unwrap_err().starts_with("invalid YAML"));
    }
}
