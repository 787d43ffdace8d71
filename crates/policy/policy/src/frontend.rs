use std::path::Path;

use crate::error::PolicyError;
use crate::ir::rule::{RuleDefinition, RuleSource};

/// Parses policy files into rule definitions.
///
/// Implementations handle one file format each (YAML, JSON, ...).
pub trait PolicyFrontend: Send + Sync {
    /// Return the file extensions this frontend supports (e.g., `["yaml", "yml"]`).
    fn extensions(&self) -> &[&str];

    /// Parse rules from a string.
    fn parse(&self, content: &str) -> Result<Vec<RuleDefinition>, PolicyError>;

    /// Parse rules from a file.
    ///
    /// The default implementation reads the file, delegates to
    /// [`parse`](Self::parse) and stamps each rule with the file as its source.
    fn parse_file(&self, path: &Path) -> Result<Vec<RuleDefinition>, PolicyError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PolicyError::Load(format!("cannot read {}: {e}", path.display())))?;
        let file = path.display().to_string();
        Ok(self
            .parse(&content)?
            .into_iter()
            .map(|rule| {
                rule.with_source(RuleSource::File {
                    file: Some(file.clone()),
                })
            })
            .collect())
    }
}
