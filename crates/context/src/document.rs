//! Partial context documents and their field-level merge rules.
//!
//! A `.ctx` file (or any fragment it extends or includes) decodes into a
//! [`ContextDocument`] where every field is optional. Documents are folded
//! together with [`Merge`], then converted into a finished [`Context`].

use cmp_core::context::{Context, Guardrails, MemoryPolicy, Role, TestingConfig, Tool};
use serde::Deserialize;
use serde_yaml::Mapping;
use std::collections::BTreeMap;

use crate::merge::{deep_merge, union_by_key};

/// Fold an overlay into `self`. Overlay fields win; absent fields keep the
/// current value.
pub trait Merge {
    fn merge_from(&mut self, overlay: Self);
}

/// Scalar rule: overlay replaces.
fn override_with<T>(base: &mut Option<T>, overlay: Option<T>) {
    if overlay.is_some() {
        *base = overlay;
    }
}

/// Nested rule: recurse when both sides are present.
fn merge_nested<T: Merge>(base: &mut Option<T>, overlay: Option<T>) {
    match (base.as_mut(), overlay) {
        (Some(current), Some(incoming)) => current.merge_from(incoming),
        (None, incoming @ Some(_)) => *base = incoming,
        (_, None) => {}
    }
}

/// List rule: union by identity key, base order first.
fn union_with<T: Clone, K: Eq + std::hash::Hash>(
    base: &mut Option<Vec<T>>,
    overlay: Option<Vec<T>>,
    key: impl Fn(&T) -> K,
) {
    let Some(incoming) = overlay else { return };
    *base = Some(match base.take() {
        Some(current) => union_by_key(&current, &incoming, key),
        None => union_by_key(&[], &incoming, key),
    });
}

/// One YAML source file, before inheritance is resolved.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextDocument {
    /// Parent document, relative to this file.
    #[serde(default)]
    pub extends: Option<String>,

    /// Fragments folded in order between the parent and this file.
    #[serde(default)]
    pub include: Option<Vec<String>>,

    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub role: Option<RoleDocument>,
    #[serde(default)]
    pub tools: Option<Vec<Tool>>,
    #[serde(default)]
    pub guardrails: Option<GuardrailsDocument>,
    #[serde(default)]
    pub memory: Option<MemoryDocument>,
    #[serde(default)]
    pub testing: Option<TestingDocument>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,

    /// Keys the Context type does not model.
    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleDocument {
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub limitations: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuardrailsDocument {
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryDocument {
    #[serde(default)]
    pub episodic: Option<bool>,
    #[serde(default)]
    pub max_history: Option<u32>,
    #[serde(default)]
    pub privacy: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestingDocument {
    #[serde(default)]
    pub drift_threshold: Option<f64>,
    #[serde(default)]
    pub business_rules: Option<Vec<String>>,
}

impl Merge for RoleDocument {
    fn merge_from(&mut self, overlay: Self) {
        override_with(&mut self.persona, overlay.persona);
        union_with(&mut self.capabilities, overlay.capabilities, String::clone);
        union_with(&mut self.limitations, overlay.limitations, String::clone);
    }
}

impl Merge for GuardrailsDocument {
    fn merge_from(&mut self, overlay: Self) {
        override_with(&mut self.tone, overlay.tone);
        override_with(&mut self.format, overlay.format);
        override_with(&mut self.max_tokens, overlay.max_tokens);
        override_with(&mut self.temperature, overlay.temperature);
    }
}

impl Merge for MemoryDocument {
    fn merge_from(&mut self, overlay: Self) {
        override_with(&mut self.episodic, overlay.episodic);
        override_with(&mut self.max_history, overlay.max_history);
        override_with(&mut self.privacy, overlay.privacy);
    }
}

impl Merge for TestingDocument {
    fn merge_from(&mut self, overlay: Self) {
        override_with(&mut self.drift_threshold, overlay.drift_threshold);
        union_with(&mut self.business_rules, overlay.business_rules, String::clone);
    }
}

impl Merge for BTreeMap<String, String> {
    fn merge_from(&mut self, overlay: Self) {
        self.extend(overlay);
    }
}

impl Merge for ContextDocument {
    fn merge_from(&mut self, overlay: Self) {
        override_with(&mut self.name, overlay.name);
        override_with(&mut self.version, overlay.version);
        override_with(&mut self.description, overlay.description);
        merge_nested(&mut self.role, overlay.role);
        union_with(&mut self.tools, overlay.tools, |tool: &Tool| {
            tool.identity_key().to_string()
        });
        merge_nested(&mut self.guardrails, overlay.guardrails);
        merge_nested(&mut self.memory, overlay.memory);
        merge_nested(&mut self.testing, overlay.testing);
        merge_nested(&mut self.metadata, overlay.metadata);
        self.extra = deep_merge(&self.extra, &overlay.extra);
    }
}

impl ContextDocument {
    /// Drop inheritance directives once they have been resolved.
    pub fn strip_meta(&mut self) {
        self.extends = None;
        self.include = None;
    }

    /// Build the finished Context. Missing fields take their defaults;
    /// semantic validation happens afterwards.
    pub fn into_context(self) -> Context {
        let role = self.role.unwrap_or_default();
        let guardrails = self.guardrails.unwrap_or_default();
        let memory = self.memory.unwrap_or_default();
        let testing = self.testing.unwrap_or_default();
        let defaults = TestingConfig::default();

        Context {
            name: self.name.unwrap_or_default(),
            version: self.version.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            role: Role {
                persona: role.persona.unwrap_or_default(),
                capabilities: role.capabilities.unwrap_or_default(),
                limitations: role.limitations.unwrap_or_default(),
            },
            tools: self.tools.unwrap_or_default(),
            guardrails: Guardrails {
                tone: guardrails.tone.unwrap_or_default(),
                format: guardrails.format.unwrap_or_default(),
                max_tokens: guardrails.max_tokens.unwrap_or_default(),
                temperature: guardrails.temperature.unwrap_or_default(),
            },
            memory: MemoryPolicy {
                episodic: memory.episodic.unwrap_or_default(),
                max_history: memory.max_history.unwrap_or_default(),
                privacy: memory.privacy.unwrap_or_default(),
            },
            testing: TestingConfig {
                drift_threshold: testing.drift_threshold.unwrap_or(defaults.drift_threshold),
                business_rules: testing.business_rules.unwrap_or_default(),
            },
            metadata: self.metadata.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(src: &str) -> ContextDocument {
        serde_yaml::from_str(src).unwrap()
    }

    #[test]
    fn overlay_persona_wins_and_capabilities_union() {
        let mut base = doc("name: Base\nversion: '1.0.0'\nrole:\n  persona: Base\n  capabilities: [a, b]");
        base.merge_from(doc("role:\n  persona: Main\n  capabilities: [b, c]"));

        let ctx = base.into_context();
        assert_eq!(ctx.name, "Base");
        assert_eq!(ctx.role.persona, "Main");
        assert_eq!(ctx.role.capabilities, vec!["a", "b", "c"]);
    }

    #[test]
    fn tools_union_by_identity() {
        let mut base = doc("tools:\n  - name: base_tool\n    uri: mcp://base");
        base.merge_from(doc(
            "tools:\n  - name: include_tool\n    uri: mcp://inc\n  - name: base_tool\n    uri: mcp://other",
        ));

        let tools = base.into_context().tools;
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["base_tool", "include_tool"]);
        assert_eq!(tools[0].uri, "mcp://base");
    }

    #[test]
    fn null_section_keeps_inherited() {
        let mut base = doc("guardrails:\n  format: json\n  max_tokens: 40");
        base.merge_from(doc("guardrails: ~\ndescription: ~"));
        let ctx = base.into_context();
        assert_eq!(ctx.guardrails.format, "json");
        assert_eq!(ctx.guardrails.max_tokens, 40);
    }

    #[test]
    fn nested_scalars_merge_field_by_field() {
        let mut base = doc("guardrails:\n  format: json\n  max_tokens: 40");
        base.merge_from(doc("guardrails:\n  max_tokens: 10"));
        let ctx = base.into_context();
        assert_eq!(ctx.guardrails.format, "json");
        assert_eq!(ctx.guardrails.max_tokens, 10);
    }

    #[test]
    fn metadata_merges_key_by_key() {
        let mut base = doc("metadata:\n  owner: docs\n  tier: gold");
        base.merge_from(doc("metadata:\n  tier: silver"));
        let meta = base.into_context().metadata;
        assert_eq!(meta["owner"], "docs");
        assert_eq!(meta["tier"], "silver");
    }

    #[test]
    fn unknown_keys_are_deep_merged() {
        let mut base = doc("workflow:\n  steps: [fetch]");
        base.merge_from(doc("workflow:\n  steps: [fetch, answer]"));
        let steps = base.extra["workflow"]["steps"].as_sequence().unwrap().len();
        assert_eq!(steps, 2);
    }

    #[test]
    fn missing_testing_section_keeps_default_threshold() {
        let ctx = doc("name: a").into_context();
        assert_eq!(ctx.testing.drift_threshold, 0.85);
    }

    #[test]
    fn strip_meta_clears_directives() {
        let mut d = doc("extends: base.yaml\ninclude: [frag.yaml]\nname: x");
        assert_eq!(d.extends.as_deref(), Some("base.yaml"));
        d.strip_meta();
        assert!(d.extends.is_none());
        assert!(d.include.is_none());
    }
}
