use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::compile::PredicateCache;
use crate::config::EnforcerConfig;
use crate::engine::context::ContextSchema;
use crate::error::PolicyError;
use crate::frontend::PolicyFrontend;
use crate::ir::rule::{OverrideRule, RuleDefinition, ScopeType};

/// Where a rule's effective check string came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleOrigin {
    /// The registered default.
    Default,
    /// The default OR-ed with the deprecated check string it replaced.
    DeprecatedFallback {
        /// Name of the deprecated rule.
        deprecated: String,
        /// Release the deprecation applies from.
        since: String,
    },
    /// An operator override of a registered rule.
    Override {
        /// The override file, if known.
        file: Option<String>,
    },
    /// An operator-defined rule with no registered default.
    Custom {
        /// The override file, if known.
        file: Option<String>,
    },
}

impl RuleOrigin {
    /// Return the `snake_case` string representation (matches serde serialization).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::DeprecatedFallback { .. } => "deprecated_fallback",
            Self::Override { .. } => "override",
            Self::Custom { .. } => "custom",
        }
    }
}

impl fmt::Display for RuleOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule as it is enforced after overrides and deprecations are applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveRule {
    /// Rule name.
    pub name: String,
    /// The check string that is evaluated.
    pub check_str: String,
    /// Scope types a token must have; empty means unrestricted.
    pub scope_types: Vec<ScopeType>,
    /// Where `check_str` came from.
    pub origin: RuleOrigin,
}

/// Knobs that decide which check string becomes effective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionOptions {
    /// Drop deprecated check strings instead of OR-ing them in.
    pub enforce_new_defaults: bool,
    /// Honour operator overrides.
    pub apply_overrides: bool,
}

impl Default for ResolutionOptions {
    fn default() -> Self {
        Self {
            enforce_new_defaults: false,
            apply_overrides: true,
        }
    }
}

impl From<&EnforcerConfig> for ResolutionOptions {
    fn from(config: &EnforcerConfig) -> Self {
        Self {
            enforce_new_defaults: config.enforce_new_defaults,
            apply_overrides: config.apply_overrides,
        }
    }
}

#[derive(Debug)]
struct Resolved {
    by_name: HashMap<String, EffectiveRule>,
    order: Vec<String>,
}

/// Named rule definitions plus operator overrides.
///
/// The registry is mutable until [`finalize`](Self::finalize) succeeds; from
/// then on it only answers lookups.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: HashMap<String, RuleDefinition>,
    order: Vec<String>,
    overrides: HashMap<String, OverrideRule>,
    schema: Option<ContextSchema>,
    resolved: Option<Resolved>,
}

impl RuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate rule attribute paths against `schema` at finalize.
    #[must_use]
    pub fn with_schema(mut self, schema: ContextSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Register a default rule.
    pub fn register(&mut self, rule: RuleDefinition) -> Result<(), PolicyError> {
        self.ensure_mutable(&rule.name)?;
        if self.rules.contains_key(&rule.name) {
            return Err(PolicyError::DuplicateRule(rule.name));
        }
        debug!(rule = %rule.name, "registered rule");
        self.order.push(rule.name.clone());
        self.rules.insert(rule.name.clone(), rule);
        Ok(())
    }

    /// Register several rules, stopping at the first failure.
    pub fn register_all(
        &mut self,
        rules: impl IntoIterator<Item = RuleDefinition>,
    ) -> Result<usize, PolicyError> {
        let mut count = 0;
        for rule in rules {
            self.register(rule)?;
            count += 1;
        }
        Ok(count)
    }

    /// Attach an operator override. A later override for the same name
    /// replaces the earlier one.
    pub fn set_override(
        &mut self,
        name: impl Into<String>,
        rule: OverrideRule,
    ) -> Result<(), PolicyError> {
        let name = name.into();
        self.ensure_mutable(&name)?;
        self.overrides.insert(name, rule);
        Ok(())
    }

    /// Load rules from a directory using the provided frontends.
    ///
    /// Files are visited in name order; files no frontend claims are
    /// skipped. Returns the number of rules registered.
    pub fn load_directory(
        &mut self,
        path: &Path,
        frontends: &[&dyn PolicyFrontend],
    ) -> Result<usize, PolicyError> {
        let entries = std::fs::read_dir(path).map_err(|e| {
            PolicyError::Load(format!("cannot read directory {}: {e}", path.display()))
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| PolicyError::Load(format!("directory entry error: {e}")))?;
            let file_path = entry.path();
            if file_path.is_file() {
                files.push(file_path);
            }
        }
        files.sort();

        let mut loaded = 0;
        for file_path in files {
            let extension = file_path
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("");

            if let Some(frontend) = frontends
                .iter()
                .find(|frontend| frontend.extensions().contains(&extension))
            {
                loaded += self.register_all(frontend.parse_file(&file_path)?)?;
            }
        }
        info!(path = %path.display(), rules = loaded, "loaded policy directory");
        Ok(loaded)
    }

    /// Validate the registry, compute every effective rule and lock it.
    ///
    /// Every effective check string is compiled into `cache`. On error the
    /// registry stays unfinalized and unchanged.
    pub fn finalize(
        &mut self,
        options: &ResolutionOptions,
        cache: &PredicateCache,
    ) -> Result<(), PolicyError> {
        self.ensure_mutable("registry")?;

        for name in &self.order {
            let rule = &self.rules[name];
            if let Some(link) = &rule.deprecated
                && !self.rules.contains_key(&link.name)
            {
                return Err(PolicyError::DanglingDeprecation {
                    rule: name.clone(),
                    target: link.name.clone(),
                });
            }
        }

        let mut by_name = HashMap::new();
        let mut order = Vec::with_capacity(self.order.len());
        for name in &self.order {
            let effective = self.effective_for(&self.rules[name], options);
            order.push(name.clone());
            by_name.insert(name.clone(), effective);
        }
        if options.apply_overrides {
            let mut custom: Vec<&String> = self
                .overrides
                .keys()
                .filter(|name| !self.rules.contains_key(*name))
                .collect();
            custom.sort();
            for name in custom {
                let rule = &self.overrides[name];
                order.push(name.clone());
                by_name.insert(
                    name.clone(),
                    EffectiveRule {
                        name: name.clone(),
                        check_str: rule.check_str.clone(),
                        scope_types: rule.scope_types.clone(),
                        origin: RuleOrigin::Custom {
                            file: rule.file.clone(),
                        },
                    },
                );
            }
        }

        let mut refs: HashMap<&str, Vec<String>> = HashMap::with_capacity(order.len());
        for name in &order {
            let effective = &by_name[name];
            let predicate = cache.get_or_compile(&effective.check_str).map_err(|source| {
                PolicyError::InvalidRule {
                    rule: name.clone(),
                    source,
                }
            })?;

            let rule_refs: Vec<String> = predicate
                .expr()
                .rule_refs()
                .into_iter()
                .map(str::to_owned)
                .collect();
            if let Some(missing) = rule_refs.iter().find(|r| !by_name.contains_key(*r)) {
                return Err(PolicyError::UndefinedReference {
                    rule: name.clone(),
                    reference: missing.clone(),
                });
            }

            if let Some(schema) = &self.schema
                && let Some(path) = predicate
                    .expr()
                    .attribute_paths()
                    .into_iter()
                    .find(|path| schema.requirement(path).is_none())
            {
                return Err(PolicyError::UnregisteredPath {
                    rule: name.clone(),
                    path: path.to_owned(),
                });
            }

            refs.insert(name.as_str(), rule_refs);
        }
        detect_cycles(&order, &refs)?;

        let mut fallbacks = 0;
        for name in &order {
            if let RuleOrigin::DeprecatedFallback { deprecated, since } = &by_name[name].origin {
                fallbacks += 1;
                warn!(
                    rule = %name,
                    deprecated = %deprecated,
                    since = %since,
                    "deprecated check string is still honoured; set enforce_new_defaults to drop it"
                );
            }
        }
        info!(
            rules = order.len(),
            overrides = self.overrides.len(),
            deprecated_fallbacks = fallbacks,
            "policy registry finalized"
        );

        self.resolved = Some(Resolved { by_name, order });
        Ok(())
    }

    /// Whether [`finalize`](Self::finalize) has succeeded.
    pub fn is_finalized(&self) -> bool {
        self.resolved.is_some()
    }

    /// The effective rule enforced for `name`.
    pub fn resolve(&self, name: &str) -> Result<&EffectiveRule, PolicyError> {
        let resolved = self.resolved.as_ref().ok_or(PolicyError::NotFinalized)?;
        resolved
            .by_name
            .get(name)
            .ok_or_else(|| PolicyError::UnknownRule(name.to_owned()))
    }

    /// Effective rules: registered rules in registration order, then custom
    /// rules by name.
    pub fn effective_rules(&self) -> Result<Vec<&EffectiveRule>, PolicyError> {
        let resolved = self.resolved.as_ref().ok_or(PolicyError::NotFinalized)?;
        Ok(resolved
            .order
            .iter()
            .map(|name| &resolved.by_name[name])
            .collect())
    }

    /// Registered default rules in registration order.
    pub fn rules(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.order.iter().map(|name| &self.rules[name])
    }

    /// Look up a registered default rule.
    pub fn rule(&self, name: &str) -> Option<&RuleDefinition> {
        self.rules.get(name)
    }

    /// The attached context schema.
    pub fn schema(&self) -> Option<&ContextSchema> {
        self.schema.as_ref()
    }

    /// Number of registered default rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` when no rule is registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn ensure_mutable(&self, what: &str) -> Result<(), PolicyError> {
        if self.is_finalized() {
            return Err(PolicyError::RegistryFinalized(what.to_owned()));
        }
        Ok(())
    }

    fn effective_for(&self, rule: &RuleDefinition, options: &ResolutionOptions) -> EffectiveRule {
        let overridden = |over: &OverrideRule| EffectiveRule {
            name: rule.name.clone(),
            check_str: over.check_str.clone(),
            scope_types: over.scope_types.clone(),
            origin: RuleOrigin::Override {
                file: over.file.clone(),
            },
        };

        if options.apply_overrides {
            if let Some(over) = self.overrides.get(&rule.name) {
                return overridden(over);
            }
            if let Some(link) = &rule.deprecated
                && link.name != rule.name
                && let Some(over) = self.overrides.get(&link.name)
            {
                return overridden(over);
            }
        }

        if !options.enforce_new_defaults
            && let Some(link) = &rule.deprecated
            && link.check_str != rule.check_str
        {
            return EffectiveRule {
                name: rule.name.clone(),
                check_str: format!("({}) or ({})", rule.check_str, link.check_str),
                scope_types: rule.scope_types.clone(),
                origin: RuleOrigin::DeprecatedFallback {
                    deprecated: link.name.clone(),
                    since: link.since.clone(),
                },
            };
        }

        EffectiveRule {
            name: rule.name.clone(),
            check_str: rule.check_str.clone(),
            scope_types: rule.scope_types.clone(),
            origin: RuleOrigin::Default,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first search over `rule:` edges; reports the first cycle found.
fn detect_cycles(order: &[String], refs: &HashMap<&str, Vec<String>>) -> Result<(), PolicyError> {
    fn visit<'a>(
        name: &'a str,
        refs: &'a HashMap<&str, Vec<String>>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), PolicyError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<&str> = path[start..].to_vec();
                cycle.push(name);
                return Err(PolicyError::ReferenceCycle(cycle.join(" -> ")));
            }
            None => {}
        }
        marks.insert(name, Mark::Visiting);
        path.push(name);
        for next in refs.get(name).into_iter().flatten() {
            visit(next, refs, marks, path)?;
        }
        path.pop();
        marks.insert(name, Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::with_capacity(order.len());
    let mut path = Vec::new();
    for name in order {
        visit(name, refs, &mut marks, &mut path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::rule::DeprecatedRuleLink;

    fn finalize(registry: &mut RuleRegistry) -> Result<(), PolicyError> {
        registry.finalize(&ResolutionOptions::default(), &PredicateCache::new())
    }

    fn list_domains() -> RuleDefinition {
        RuleDefinition::new("identity:list_domains", "role:reader and system_scope:all")
            .with_scope_types([ScopeType::System])
            .with_deprecated(
                DeprecatedRuleLink::new("identity:list_domains", "rule:admin_required")
                    .with_since("stein"),
            )
    }

    fn base() -> RuleRegistry {
        let mut registry = RuleRegistry::new();
        registry
            .register(RuleDefinition::new("admin_required", "role:admin"))
            .unwrap();
        registry.register(list_domains()).unwrap();
        registry
    }

    #[test]
    fn duplicate_rule_rejected() {
        let mut registry = base();
        let err = registry.register(list_domains()).unwrap_err();
        assert!(matches!(err, PolicyError::DuplicateRule(name) if name == "identity:list_domains"));
    }

    #[test]
    fn deprecated_fallback_when_new_defaults_not_enforced() {
        let mut registry = base();
        finalize(&mut registry).unwrap();

        let rule = registry.resolve("identity:list_domains").unwrap();
        assert_eq!(
            rule.check_str,
            "(role:reader and system_scope:all) or (rule:admin_required)"
        );
        assert_eq!(
            rule.origin,
            RuleOrigin::DeprecatedFallback {
                deprecated: "identity:list_domains".into(),
                since: "stein".into()
            }
        );
        assert_eq!(rule.scope_types, vec![ScopeType::System]);
    }

    #[test]
    fn new_defaults_drop_deprecated_check() {
        let mut registry = base();
        let options = ResolutionOptions {
            enforce_new_defaults: true,
            ..ResolutionOptions::default()
        };
        registry.finalize(&options, &PredicateCache::new()).unwrap();

        let rule = registry.resolve("identity:list_domains").unwrap();
        assert_eq!(rule.check_str, "role:reader and system_scope:all");
        assert_eq!(rule.origin, RuleOrigin::Default);
    }

    #[test]
    fn identical_deprecated_check_is_not_merged() {
        let mut registry = RuleRegistry::new();
        registry
            .register(
                RuleDefinition::new("a", "@").with_deprecated(DeprecatedRuleLink::new("a", "@")),
            )
            .unwrap();
        finalize(&mut registry).unwrap();
        assert_eq!(registry.resolve("a").unwrap().origin, RuleOrigin::Default);
    }

    #[test]
    fn override_replaces_check_and_scope_atomically() {
        let mut registry = base();
        registry
            .set_override(
                "identity:list_domains",
                OverrideRule::new("role:auditor").with_file("/etc/warden/policy.yaml"),
            )
            .unwrap();
        finalize(&mut registry).unwrap();

        let rule = registry.resolve("identity:list_domains").unwrap();
        assert_eq!(rule.check_str, "role:auditor");
        assert!(rule.scope_types.is_empty());
        assert_eq!(
            rule.origin,
            RuleOrigin::Override {
                file: Some("/etc/warden/policy.yaml".into())
            }
        );
    }

    #[test]
    fn override_under_deprecated_name_applies() {
        let mut registry = base();
        registry
            .register(RuleDefinition::new("identity:old_list", "rule:admin_required"))
            .unwrap();
        registry
            .register(
                RuleDefinition::new("identity:new_list", "role:reader").with_deprecated(
                    DeprecatedRuleLink::new("identity:old_list", "rule:admin_required"),
                ),
            )
            .unwrap();
        registry
            .set_override("identity:old_list", OverrideRule::new("role:operator"))
            .unwrap();
        finalize(&mut registry).unwrap();

        assert_eq!(
            registry.resolve("identity:new_list").unwrap().check_str,
            "role:operator"
        );
    }

    #[test]
    fn overrides_ignored_when_disabled() {
        let mut registry = base();
        registry
            .set_override("identity:list_domains", OverrideRule::new("!"))
            .unwrap();
        registry.set_override("custom", OverrideRule::new("@")).unwrap();
        let options = ResolutionOptions {
            apply_overrides: false,
            enforce_new_defaults: true,
        };
        registry.finalize(&options, &PredicateCache::new()).unwrap();

        assert_eq!(
            registry.resolve("identity:list_domains").unwrap().origin,
            RuleOrigin::Default
        );
        assert!(matches!(
            registry.resolve("custom"),
            Err(PolicyError::UnknownRule(_))
        ));
    }

    #[test]
    fn unknown_override_becomes_custom_rule() {
        let mut registry = base();
        registry
            .set_override("owner", OverrideRule::new("token.user.id:%(target.user_id)s"))
            .unwrap();
        finalize(&mut registry).unwrap();

        let rule = registry.resolve("owner").unwrap();
        assert_eq!(rule.origin, RuleOrigin::Custom { file: None });
        let names: Vec<&str> = registry
            .effective_rules()
            .unwrap()
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["admin_required", "identity:list_domains", "owner"]);
    }

    #[test]
    fn dangling_deprecation_fails_finalize() {
        let mut registry = RuleRegistry::new();
        registry
            .register(
                RuleDefinition::new("identity:get_domain", "@")
                    .with_deprecated(DeprecatedRuleLink::new("identity:missing", "!")),
            )
            .unwrap();
        let err = finalize(&mut registry).unwrap_err();
        assert!(matches!(err, PolicyError::DanglingDeprecation { .. }));
        assert!(!registry.is_finalized());
    }

    #[test]
    fn invalid_check_string_is_fatal() {
        let mut registry = RuleRegistry::new();
        registry.register(RuleDefinition::new("broken", "role:a and")).unwrap();
        let err = finalize(&mut registry).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidRule { ref rule, .. } if rule == "broken"));
        assert!(err.is_startup_error());
    }

    #[test]
    fn undefined_reference_is_fatal() {
        let mut registry = RuleRegistry::new();
        registry.register(RuleDefinition::new("a", "rule:nope")).unwrap();
        let err = finalize(&mut registry).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::UndefinedReference { ref reference, .. } if reference == "nope"
        ));
    }

    #[test]
    fn reference_cycle_is_fatal() {
        let mut registry = RuleRegistry::new();
        registry.register(RuleDefinition::new("a", "rule:b")).unwrap();
        registry.register(RuleDefinition::new("b", "@ and rule:a")).unwrap();
        registry.register(RuleDefinition::new("c", "rule:a")).unwrap();
        let err = finalize(&mut registry).unwrap_err();
        assert_eq!(err.to_string(), "rule reference cycle: a -> b -> a");
        assert!(!registry.is_finalized());
    }

    #[test]
    fn schema_catches_unregistered_paths() {
        let schema = ContextSchema::new().with_optional("token.project.domain.id");
        let mut registry = RuleRegistry::new().with_schema(schema);
        registry
            .register(RuleDefinition::new(
                "identity:get_domain",
                "token.project.domain.id:%(target.domian.id)s",
            ))
            .unwrap();
        let err = finalize(&mut registry).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::UnregisteredPath { ref path, .. } if path == "target.domian.id"
        ));
    }

    #[test]
    fn finalized_registry_is_locked() {
        let mut registry = base();
        finalize(&mut registry).unwrap();
        assert!(matches!(
            registry.register(RuleDefinition::new("late", "@")),
            Err(PolicyError::RegistryFinalized(_))
        ));
        assert!(matches!(
            registry.set_override("late", OverrideRule::new("@")),
            Err(PolicyError::RegistryFinalized(_))
        ));
        assert!(finalize(&mut registry).is_err());
    }

    #[test]
    fn resolve_before_finalize() {
        let registry = base();
        assert!(matches!(
            registry.resolve("admin_required"),
            Err(PolicyError::NotFinalized)
        ));
    }

    #[test]
    fn unknown_rule() {
        let mut registry = base();
        finalize(&mut registry).unwrap();
        assert!(matches!(
            registry.resolve("nonexistent_rule"),
            Err(PolicyError::UnknownRule(name)) if name == "nonexistent_rule"
        ));
    }

    #[test]
    fn finalize_compiles_eagerly() {
        let mut registry = base();
        let cache = PredicateCache::new();
        registry
            .finalize(&ResolutionOptions::default(), &cache)
            .unwrap();
        assert_eq!(cache.len(), 2);
    }
}
