use std::path::Path;

use tracing::debug;
use warden_policy::{DeprecatedRuleLink, PolicyError, PolicyFrontend, RuleDefinition, RuleSource};

use crate::parser::{PolicyFile, PolicyRule};

/// A [`PolicyFrontend`] that reads rule defaults from YAML or JSON files.
pub struct YamlFrontend;

impl PolicyFrontend for YamlFrontend {
    fn extensions(&self) -> &[&str] {
        &["yaml", "yml", "json"]
    }

    fn parse(&self, content: &str) -> Result<Vec<RuleDefinition>, PolicyError> {
        let file: PolicyFile = serde_yaml_ng::from_str(content)
            .map_err(|e| PolicyError::Load(format!("YAML parse error: {e}")))?;

        Ok(file
            .rules
            .into_iter()
            .map(|rule| compile_rule(rule, None))
            .collect())
    }

    fn parse_file(&self, path: &Path) -> Result<Vec<RuleDefinition>, PolicyError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PolicyError::Load(format!("cannot read {}: {e}", path.display())))?;

        let file: PolicyFile = serde_yaml_ng::from_str(&content).map_err(|e| {
            PolicyError::Load(format!("YAML parse error in {}: {e}", path.display()))
        })?;

        debug!(file = %path.display(), rules = file.rules.len(), "parsed policy file");
        Ok(file
            .rules
            .into_iter()
            .map(|rule| compile_rule(rule, Some(path)))
            .collect())
    }
}

/// Convert a file rule into a [`RuleDefinition`].
///
/// Check strings are not compiled here; the registry compiles them at
/// finalize so every error carries the rule name.
fn compile_rule(rule: PolicyRule, file: Option<&Path>) -> RuleDefinition {
    let source = match file {
        Some(path) => RuleSource::File {
            file: Some(path.display().to_string()),
        },
        None => RuleSource::Inline,
    };

    let mut definition = RuleDefinition::new(rule.name, rule.check_str)
        .with_scope_types(rule.scope_types)
        .with_source(source);
    if let Some(description) = rule.description {
        definition = definition.with_description(description.trim());
    }
    for op in rule.operations {
        definition = definition.with_operation(op.method, op.path);
    }
    if let Some(deprecated) = rule.deprecated_rule {
        definition = definition.with_deprecated(
            DeprecatedRuleLink::new(deprecated.name, deprecated.check_str)
                .with_reason(rule.deprecated_reason.unwrap_or_default().trim())
                .with_since(rule.deprecated_since.unwrap_or_default()),
        );
    }
    definition
}
