use serde::{Deserialize, Serialize};

/// Runtime behaviour of an [`Enforcer`](crate::Enforcer).
///
/// # Example
///
/// ```toml
/// [enforcer]
/// enforce_scope = true
/// enforce_new_defaults = false
/// apply_overrides = true
/// record_trace = false
/// max_rule_depth = 32
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcerConfig {
    /// Deny requests whose token scope is not among the rule's scope types.
    /// When `false`, a mismatch is only logged.
    #[serde(default = "default_enforce_scope")]
    pub enforce_scope: bool,
    /// Ignore deprecated check strings instead of OR-ing them into the new
    /// defaults.
    #[serde(default)]
    pub enforce_new_defaults: bool,
    /// Honour operator overrides.
    #[serde(default = "default_apply_overrides")]
    pub apply_overrides: bool,
    /// Attach an atom trace to every decision (explain mode always does).
    #[serde(default)]
    pub record_trace: bool,
    /// Maximum nesting of `rule:` references during evaluation.
    #[serde(default = "default_max_rule_depth")]
    pub max_rule_depth: usize,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            enforce_scope: default_enforce_scope(),
            enforce_new_defaults: false,
            apply_overrides: default_apply_overrides(),
            record_trace: false,
            max_rule_depth: default_max_rule_depth(),
        }
    }
}

impl EnforcerConfig {
    /// Toggle scope enforcement.
    #[must_use]
    pub fn with_enforce_scope(mut self, enforce: bool) -> Self {
        self.enforce_scope = enforce;
        self
    }

    /// Toggle strict new defaults.
    #[must_use]
    pub fn with_enforce_new_defaults(mut self, enforce: bool) -> Self {
        self.enforce_new_defaults = enforce;
        self
    }

    /// Toggle operator overrides.
    #[must_use]
    pub fn with_apply_overrides(mut self, apply: bool) -> Self {
        self.apply_overrides = apply;
        self
    }

    /// Toggle trace recording.
    #[must_use]
    pub fn with_record_trace(mut self, record: bool) -> Self {
        self.record_trace = record;
        self
    }

    /// Set the maximum `rule:` nesting depth.
    #[must_use]
    pub fn with_max_rule_depth(mut self, depth: usize) -> Self {
        self.max_rule_depth = depth;
        self
    }
}

fn default_enforce_scope() -> bool {
    true
}

fn default_apply_overrides() -> bool {
    true
}

pub(crate) fn default_max_rule_depth() -> usize {
    32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EnforcerConfig::default();
        assert!(config.enforce_scope);
        assert!(!config.enforce_new_defaults);
        assert!(config.apply_overrides);
        assert!(!config.record_trace);
        assert_eq!(config.max_rule_depth, 32);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: EnforcerConfig =
            serde_json::from_str(r#"{"enforce_new_defaults": true}"#).unwrap();
        assert!(config.enforce_new_defaults);
        assert!(config.enforce_scope);
        assert_eq!(config.max_rule_depth, 32);
    }
}
