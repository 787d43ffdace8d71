use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The granularity a token's authority is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    /// System-wide authority.
    System,
    /// Authority over a single domain.
    Domain,
    /// Authority over a single project.
    Project,
}

impl ScopeType {
    /// Return the `snake_case` string representation (matches serde serialization).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Domain => "domain",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "domain" => Ok(Self::Domain),
            "project" => Ok(Self::Project),
            other => Err(format!("unknown scope type '{other}'")),
        }
    }
}

/// An API operation a rule protects. Documentation only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// HTTP-like verb, e.g. `GET`.
    pub method: String,
    /// Path template, e.g. `/v3/domains/{domain_id}`.
    pub path: String,
}

/// Deprecation metadata: the legacy check string a rule replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeprecatedRuleLink {
    /// Name of the deprecated rule. Must resolve to a registered rule.
    pub name: String,
    /// The legacy check string.
    pub check_str: String,
    /// Why the rule was deprecated.
    #[serde(default)]
    pub reason: String,
    /// Release marker the deprecation applies from (e.g. `stein`).
    #[serde(default)]
    pub since: String,
}

impl DeprecatedRuleLink {
    /// Create a link to the deprecated rule `name` with its legacy check string.
    pub fn new(name: impl Into<String>, check_str: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            check_str: check_str.into(),
            reason: String::new(),
            since: String::new(),
        }
    }

    /// Set the deprecation reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Set the release the deprecation applies from.
    #[must_use]
    pub fn with_since(mut self, since: impl Into<String>) -> Self {
        self.since = since.into();
        self
    }
}

/// Where a rule was loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RuleSource {
    /// Loaded from a policy file.
    File {
        /// The file path, if available.
        file: Option<String>,
    },
    /// Defined inline in code.
    #[default]
    Inline,
}

/// A named default rule: the unit the registry stores.
///
/// Rules are immutable once registered; operators change behaviour through
/// overrides, never by mutating the default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Identifier, unique within a registry (e.g. `identity:get_domain`).
    pub name: String,
    /// The default check string.
    pub check_str: String,
    /// Scope types a token must have; empty means unrestricted.
    #[serde(default)]
    pub scope_types: Vec<ScopeType>,
    /// Human description.
    #[serde(default)]
    pub description: Option<String>,
    /// Documented API operations.
    #[serde(default)]
    pub operations: Vec<Operation>,
    /// The legacy rule this one replaced, if any.
    #[serde(default)]
    pub deprecated: Option<DeprecatedRuleLink>,
    /// Where this rule was loaded from.
    #[serde(default)]
    pub source: RuleSource,
}

impl RuleDefinition {
    /// Create a rule with no scope restriction, description or operations.
    pub fn new(name: impl Into<String>, check_str: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            check_str: check_str.into(),
            scope_types: Vec::new(),
            description: None,
            operations: Vec::new(),
            deprecated: None,
            source: RuleSource::Inline,
        }
    }

    /// Set the allowed scope types. Duplicates are dropped, first occurrence wins.
    #[must_use]
    pub fn with_scope_types(mut self, scope_types: impl IntoIterator<Item = ScopeType>) -> Self {
        self.scope_types.clear();
        for scope in scope_types {
            if !self.scope_types.contains(&scope) {
                self.scope_types.push(scope);
            }
        }
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Document an operation guarded by this rule.
    #[must_use]
    pub fn with_operation(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.operations.push(Operation {
            method: method.into(),
            path: path.into(),
        });
        self
    }

    /// Attach a deprecated rule link.
    #[must_use]
    pub fn with_deprecated(mut self, link: DeprecatedRuleLink) -> Self {
        self.deprecated = Some(link);
        self
    }

    /// Set the source.
    #[must_use]
    pub fn with_source(mut self, source: RuleSource) -> Self {
        self.source = source;
        self
    }
}

/// An operator-supplied replacement for a rule.
///
/// Replacement is atomic: the override's check string and scope types take
/// the place of the default's, nothing is merged field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRule {
    /// The replacement check string.
    pub check_str: String,
    /// Scope types for the replaced rule; empty means unrestricted.
    #[serde(default)]
    pub scope_types: Vec<ScopeType>,
    /// The file the override came from.
    #[serde(default)]
    pub file: Option<String>,
}

impl OverrideRule {
    /// Create an override with no scope restriction.
    pub fn new(check_str: impl Into<String>) -> Self {
        Self {
            check_str: check_str.into(),
            scope_types: Vec::new(),
            file: None,
        }
    }

    /// Set the scope types.
    #[must_use]
    pub fn with_scope_types(mut self, scope_types: impl IntoIterator<Item = ScopeType>) -> Self {
        self.scope_types = scope_types.into_iter().collect();
        self
    }

    /// Record the file the override was read from.
    #[must_use]
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}
