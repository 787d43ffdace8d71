use std::sync::Arc;

use tracing::{instrument, warn};

use crate::compile::{CompiledPredicate, PredicateCache};
use crate::config::EnforcerConfig;
use crate::engine::context::{ContextResolver, RawRequest, ResourceStore};
use crate::engine::decision::{Decision, DecisionReason};
use crate::engine::eval::{self, Evaluator, RuleLookup};
use crate::error::PolicyError;
use crate::registry::{EffectiveRule, ResolutionOptions, RuleRegistry};

/// Answers "may this request perform this operation?".
///
/// An enforcer owns one finalized [`RuleRegistry`] and the predicate cache
/// built for it. It is `Send + Sync`; share it behind an `Arc`.
#[derive(Debug)]
pub struct Enforcer {
    registry: RuleRegistry,
    cache: PredicateCache,
    resolver: ContextResolver,
    config: EnforcerConfig,
}

impl Enforcer {
    /// Create an enforcer, finalizing `registry` with the resolution options
    /// from `config`.
    ///
    /// An already finalized registry is rejected with
    /// [`PolicyError::RegistryFinalized`]: its effective rules were computed
    /// under other options.
    pub fn new(mut registry: RuleRegistry, config: EnforcerConfig) -> Result<Self, PolicyError> {
        let cache = PredicateCache::new();
        registry.finalize(&ResolutionOptions::from(&config), &cache)?;
        Ok(Self {
            registry,
            cache,
            resolver: ContextResolver::new(),
            config,
        })
    }

    /// Consult `store` for target attributes missing from requests.
    #[must_use]
    pub fn with_resource_store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.resolver = self.resolver.with_store(store);
        self
    }

    /// Decide whether `raw` may perform `operation`.
    ///
    /// A context that cannot be built is a deny. Unknown operations are an
    /// error.
    #[instrument(skip_all, fields(operation = %operation))]
    pub fn check_access(&self, operation: &str, raw: &RawRequest) -> Result<Decision, PolicyError> {
        self.decide(operation, raw, self.config.record_trace)
    }

    /// Like [`check_access`](Self::check_access), but a deny is returned as
    /// [`PolicyError::Forbidden`].
    pub fn authorize(&self, operation: &str, raw: &RawRequest) -> Result<Decision, PolicyError> {
        let decision = self.check_access(operation, raw)?;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(PolicyError::Forbidden {
                rule: decision.rule,
            })
        }
    }

    /// Like [`check_access`](Self::check_access), always recording the trace.
    #[instrument(skip_all, fields(operation = %operation))]
    pub fn explain(&self, operation: &str, raw: &RawRequest) -> Result<Decision, PolicyError> {
        self.decide(operation, raw, true)
    }

    /// The finalized registry.
    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// The predicate cache.
    pub fn cache(&self) -> &PredicateCache {
        &self.cache
    }

    /// The enforcer configuration.
    pub fn config(&self) -> &EnforcerConfig {
        &self.config
    }

    /// Drop every compiled predicate; they are recompiled on next use.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn decide(
        &self,
        operation: &str,
        raw: &RawRequest,
        record_trace: bool,
    ) -> Result<Decision, PolicyError> {
        let ctx = self.resolver.resolve(raw);
        let rule = self.registry.resolve(operation)?;
        let ctx = match ctx {
            Ok(ctx) => ctx,
            Err(PolicyError::Context(message)) => {
                warn!(rule = %rule.name, error = %message, "request context unavailable");
                return Ok(Decision::denied(
                    &rule.name,
                    rule.origin.clone(),
                    DecisionReason::ContextUnavailable { message },
                ));
            }
            Err(e) => return Err(e),
        };

        if !rule.scope_types.is_empty() {
            let token = ctx.scope_type();
            if !token.is_some_and(|scope| rule.scope_types.contains(&scope)) {
                let reason = DecisionReason::ScopeMismatch {
                    token,
                    allowed: rule.scope_types.clone(),
                };
                if self.config.enforce_scope {
                    return Ok(Decision::denied(&rule.name, rule.origin.clone(), reason)
                        .with_trace(record_trace.then(Vec::new)));
                }
                warn!(rule = %rule.name, %reason, "scope mismatch not enforced; evaluating anyway");
            }
        }

        let predicate = self.compiled(rule)?;
        let mut evaluator = Evaluator::new(&ctx)
            .with_rules(self)
            .with_schema(self.registry.schema())
            .with_max_depth(self.config.max_rule_depth)
            .with_trace(record_trace);
        let truth = evaluator.evaluate(&rule.name, &predicate)?;
        Ok(eval::decide(&rule.name, rule.origin.clone(), truth, evaluator))
    }

    fn compiled(&self, rule: &EffectiveRule) -> Result<Arc<CompiledPredicate>, PolicyError> {
        self.cache
            .get_or_compile(&rule.check_str)
            .map_err(|source| PolicyError::InvalidRule {
                rule: rule.name.clone(),
                source,
            })
    }
}

impl RuleLookup for Enforcer {
    fn predicate(&self, name: &str) -> Result<Arc<CompiledPredicate>, PolicyError> {
        self.compiled(self.registry.resolve(name)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::engine::context::{Credential, TokenScope};
    use crate::engine::trace::AtomOutcome;
    use crate::ir::rule::{DeprecatedRuleLink, OverrideRule, RuleDefinition, ScopeType};
    use crate::registry::RuleOrigin;

    const GET_DOMAIN: &str =
        "(role:reader and system_scope:all) or token.project.domain.id:%(target.domain.id)s";

    fn registry() -> RuleRegistry {
        let mut registry = RuleRegistry::new();
        registry
            .register_all([
                RuleDefinition::new("admin_required", "role:admin"),
                RuleDefinition::new("identity:get_domain", GET_DOMAIN)
                    .with_scope_types([ScopeType::System, ScopeType::Project]),
                RuleDefinition::new("identity:list_domains", "role:reader and system_scope:all")
                    .with_scope_types([ScopeType::System])
                    .with_deprecated(DeprecatedRuleLink::new(
                        "identity:list_domains",
                        "rule:admin_required",
                    )),
            ])
            .unwrap();
        registry
    }

    fn strict() -> Enforcer {
        Enforcer::new(
            registry(),
            EnforcerConfig::default().with_enforce_new_defaults(true),
        )
        .unwrap()
    }

    fn allowed(enforcer: &Enforcer, operation: &str, raw: &RawRequest) -> bool {
        enforcer.check_access(operation, raw).unwrap().allowed
    }

    fn system(role: &str) -> Credential {
        Credential::new()
            .with_role(role)
            .with_scope(TokenScope::System { scope: "all".into() })
    }

    fn project_member(domain_id: &str) -> Credential {
        Credential::new().with_role("member").with_scope(TokenScope::Project {
            id: "p1".into(),
            domain_id: domain_id.into(),
        })
    }

    #[test]
    fn get_domain_scenarios() {
        let enforcer = strict();

        let reader = RawRequest::new(system("reader"), json!({}));
        assert!(allowed(&enforcer, "identity:get_domain", &reader));

        let same = RawRequest::new(project_member("d1"), json!({"domain": {"id": "d1"}}));
        assert!(allowed(&enforcer, "identity:get_domain", &same));

        let other = RawRequest::new(project_member("d1"), json!({"domain": {"id": "d2"}}));
        let decision = enforcer.check_access("identity:get_domain", &other).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::CheckFailed);
    }

    #[test]
    fn list_domains_without_reader_is_denied() {
        let enforcer = strict();
        let raw = RawRequest::new(system("member"), json!({}));
        let decision = enforcer.check_access("identity:list_domains", &raw).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.rule, "identity:list_domains");
    }

    #[test]
    fn unknown_operation_is_an_error() {
        let enforcer = strict();
        let err = enforcer
            .check_access("nonexistent_rule", &RawRequest::default())
            .unwrap_err();
        assert!(matches!(err, PolicyError::UnknownRule(name) if name == "nonexistent_rule"));
    }

    #[test]
    fn bad_context_is_a_deny() {
        let enforcer = strict();
        let raw = RawRequest::new(system("reader"), json!("d1"));
        let decision = enforcer.check_access("identity:get_domain", &raw).unwrap();
        assert!(!decision.allowed);
        assert!(matches!(decision.reason, DecisionReason::ContextUnavailable { .. }));
    }

    #[test]
    fn scope_mismatch_denied_when_enforced() {
        let enforcer = strict();
        let raw = RawRequest::new(
            Credential::new()
                .with_role("reader")
                .with_scope(TokenScope::Domain { id: "d1".into() }),
            json!({}),
        );
        let decision = enforcer.check_access("identity:list_domains", &raw).unwrap();
        assert!(!decision.allowed);
        assert_eq!(
            decision.reason,
            DecisionReason::ScopeMismatch {
                token: Some(ScopeType::Domain),
                allowed: vec![ScopeType::System],
            }
        );
    }

    #[test]
    fn scope_mismatch_only_warns_when_not_enforced() {
        let mut registry = RuleRegistry::new();
        registry
            .register(
                RuleDefinition::new("identity:list_domains", "role:reader")
                    .with_scope_types([ScopeType::System]),
            )
            .unwrap();
        let enforcer =
            Enforcer::new(registry, EnforcerConfig::default().with_enforce_scope(false)).unwrap();
        let raw = RawRequest::new(project_member("d1").with_role("reader"), json!({}));
        assert!(allowed(&enforcer, "identity:list_domains", &raw));
    }

    #[test]
    fn authorize_turns_deny_into_forbidden() {
        let enforcer = strict();
        let raw = RawRequest::new(system("member"), json!({}));
        let err = enforcer.authorize("identity:list_domains", &raw).unwrap_err();
        assert_eq!(
            err.to_string(),
            "policy does not allow 'identity:list_domains' to be performed"
        );

        let ok = RawRequest::new(system("reader"), json!({}));
        assert!(enforcer.authorize("identity:list_domains", &ok).is_ok());
    }

    #[test]
    fn deprecated_fallback_keeps_legacy_admins() {
        let enforcer = Enforcer::new(registry(), EnforcerConfig::default()).unwrap();
        let admin = RawRequest::new(system("admin"), json!({}));
        let decision = enforcer.check_access("identity:list_domains", &admin).unwrap();
        assert!(decision.allowed);
        assert!(matches!(decision.origin, RuleOrigin::DeprecatedFallback { .. }));

        // Strict mode drops the legacy grant.
        assert!(!allowed(&strict(), "identity:list_domains", &admin));
    }

    #[test]
    fn override_is_enforced() {
        let mut registry = registry();
        registry
            .set_override(
                "identity:list_domains",
                OverrideRule::new("role:auditor").with_scope_types([ScopeType::System]),
            )
            .unwrap();
        let enforcer = Enforcer::new(registry, EnforcerConfig::default()).unwrap();

        let auditor = RawRequest::new(system("auditor"), json!({}));
        let decision = enforcer.check_access("identity:list_domains", &auditor).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.origin, RuleOrigin::Override { file: None });
    }

    #[test]
    fn explain_records_rule_references() {
        let enforcer = Enforcer::new(registry(), EnforcerConfig::default()).unwrap();
        let admin = RawRequest::new(system("admin"), json!({}));
        let decision = enforcer.explain("identity:list_domains", &admin).unwrap();
        let atoms: Vec<&str> = decision
            .trace
            .as_deref()
            .unwrap()
            .iter()
            .map(|t| t.atom.as_str())
            .collect();
        assert_eq!(atoms, vec!["role:reader", "role:admin", "rule:admin_required"]);

        assert!(enforcer.check_access("identity:list_domains", &admin).unwrap().trace.is_none());
    }

    #[test]
    fn clear_cache_recompiles_on_demand() {
        let enforcer = strict();
        assert_eq!(enforcer.cache().len(), 3);
        enforcer.clear_cache();
        assert!(enforcer.cache().is_empty());

        let raw = RawRequest::new(system("reader"), json!({}));
        assert!(allowed(&enforcer, "identity:get_domain", &raw));
        assert_eq!(enforcer.cache().len(), 1);
    }

    #[derive(Debug)]
    struct UnavailableStore;

    impl ResourceStore for UnavailableStore {
        fn lookup(&self, path: &str) -> Result<Option<String>, PolicyError> {
            Err(PolicyError::Context(format!("store down for {path}")))
        }
    }

    #[test]
    fn failed_store_lookup_under_not_denies() {
        let mut registry = RuleRegistry::new();
        registry
            .register(RuleDefinition::new(
                "identity:update_project",
                "not target.project.locked:true",
            ))
            .unwrap();
        let enforcer = Enforcer::new(registry, EnforcerConfig::default())
            .unwrap()
            .with_resource_store(Arc::new(UnavailableStore));

        let raw = RawRequest::new(system("admin"), json!({}));
        let decision = enforcer.explain("identity:update_project", &raw).unwrap();
        assert!(!decision.allowed);
        assert!(matches!(decision.reason, DecisionReason::ContextUnavailable { .. }));
        assert!(matches!(
            decision.trace.as_deref().unwrap()[0].outcome,
            AtomOutcome::Error { .. }
        ));
        assert!(enforcer.authorize("identity:update_project", &raw).is_err());

        // Present in the request, so the store is never asked.
        let unlocked = RawRequest::new(system("admin"), json!({"project": {"locked": false}}));
        assert!(allowed(&enforcer, "identity:update_project", &unlocked));
    }

    #[test]
    fn finalized_registry_is_rejected() {
        let mut registry = registry();
        registry
            .finalize(&ResolutionOptions::default(), &PredicateCache::new())
            .unwrap();
        let err = Enforcer::new(
            registry,
            EnforcerConfig::default().with_enforce_new_defaults(true),
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::RegistryFinalized(_)));
    }

    #[test]
    fn enforcer_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Enforcer>();
    }
}
