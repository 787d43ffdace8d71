use std::collections::BTreeMap;

use serde::Deserialize;
use warden_policy::ScopeType;

/// Top-level policy file containing a list of rule defaults.
#[derive(Debug, Deserialize)]
pub struct PolicyFile {
    /// The rules defined in this file.
    pub rules: Vec<PolicyRule>,
}

/// A single rule default as written in a policy file.
#[derive(Debug, Deserialize)]
pub struct PolicyRule {
    /// Rule name, e.g. `identity:get_domain`.
    pub name: String,
    /// The default check string.
    pub check_str: String,
    /// Scope types a token must have.
    #[serde(default)]
    pub scope_types: Vec<ScopeType>,
    /// Human description.
    pub description: Option<String>,
    /// Documented API operations.
    #[serde(default)]
    pub operations: Vec<PolicyOperation>,
    /// The legacy rule this default replaced.
    pub deprecated_rule: Option<PolicyDeprecatedRule>,
    /// Why the legacy rule was deprecated.
    pub deprecated_reason: Option<String>,
    /// Release the deprecation applies from.
    pub deprecated_since: Option<String>,
}

/// An API operation guarded by a rule.
#[derive(Debug, Deserialize)]
pub struct PolicyOperation {
    /// HTTP method.
    pub method: String,
    /// Path template.
    pub path: String,
}

/// The legacy name and check string a rule replaced.
#[derive(Debug, Deserialize)]
pub struct PolicyDeprecatedRule {
    /// Name of the deprecated rule.
    pub name: String,
    /// Legacy check string.
    pub check_str: String,
}

/// An operator override file: rule name to replacement.
pub type OverrideFile = BTreeMap<String, OverrideEntry>;

/// One entry of an override file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OverrideEntry {
    /// `"name": "check string"`.
    Check(String),
    /// A check string with explicit scope types.
    Full {
        /// The replacement check string.
        check_str: String,
        /// Replacement scope types; omitted means unrestricted.
        #[serde(default)]
        scope_types: Vec<ScopeType>,
    },
}
