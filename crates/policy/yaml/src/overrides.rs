use std::path::Path;

use tracing::debug;
use warden_policy::{OverrideRule, PolicyError};

use crate::parser::{OverrideEntry, OverrideFile};

/// Parse an operator override file.
///
/// The file maps rule names either to a check string or to a mapping with
/// `check_str` and `scope_types`:
///
/// ```yaml
/// "identity:delete_domain": "!"
/// "identity:list_domains":
///   check_str: "role:auditor"
///   scope_types: [system]
/// ```
///
/// Entries come back sorted by rule name. A document with only comments has
/// no overrides.
pub fn parse_overrides(content: &str) -> Result<Vec<(String, OverrideRule)>, PolicyError> {
    let blank = content.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#')
    });
    if blank {
        return Ok(Vec::new());
    }
    let file: Option<OverrideFile> = serde_yaml_ng::from_str(content)
        .map_err(|e| PolicyError::Load(format!("override file parse error: {e}")))?;

    Ok(file
        .unwrap_or_default()
        .into_iter()
        .map(|(name, entry)| {
            let rule = match entry {
                OverrideEntry::Check(check_str) => OverrideRule::new(check_str),
                OverrideEntry::Full {
                    check_str,
                    scope_types,
                } => OverrideRule::new(check_str).with_scope_types(scope_types),
            };
            (name, rule)
        })
        .collect())
}

/// Read and parse an override file, recording the path on every override.
pub fn parse_overrides_file(path: &Path) -> Result<Vec<(String, OverrideRule)>, PolicyError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PolicyError::Load(format!("cannot read {}: {e}", path.display())))?;
    let file = path.display().to_string();

    let overrides: Vec<(String, OverrideRule)> = parse_overrides(&content)
        .map_err(|e| PolicyError::Load(format!("{}: {e}", path.display())))?
        .into_iter()
        .map(|(name, rule)| (name, rule.with_file(file.clone())))
        .collect();
    debug!(file = %file, overrides = overrides.len(), "parsed override file");
    Ok(overrides)
}
