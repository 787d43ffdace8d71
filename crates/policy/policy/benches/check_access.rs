use criterion::{Criterion, black_box, criterion_group, criterion_main};

use warden_policy::{
    Credential, DeprecatedRuleLink, Enforcer, EnforcerConfig, PredicateCache, RawRequest,
    RuleDefinition, RuleRegistry, ScopeType, TokenScope, compile,
};

const GET_DOMAIN: &str =
    "(role:reader and system_scope:all) or token.project.domain.id:%(target.domain.id)s";

fn enforcer() -> Enforcer {
    let mut registry = RuleRegistry::new();
    registry
        .register_all([
            RuleDefinition::new("admin_required", "role:admin"),
            RuleDefinition::new(
                "admin_or_target_domain",
                "rule:admin_required or token.project.domain.id:%(target.domain.id)s",
            ),
            RuleDefinition::new("identity:get_domain", GET_DOMAIN)
                .with_scope_types([ScopeType::System, ScopeType::Project])
                .with_deprecated(DeprecatedRuleLink::new(
                    "identity:get_domain",
                    "rule:admin_or_target_domain",
                )),
        ])
        .expect("failed to register rules");
    Enforcer::new(registry, EnforcerConfig::default()).expect("failed to build enforcer")
}

fn project_request(domain_id: &str) -> RawRequest {
    RawRequest::new(
        Credential::new().with_role("member").with_scope(TokenScope::Project {
            id: "p1".into(),
            domain_id: "d1".into(),
        }),
        serde_json::json!({"domain": {"id": domain_id}}),
    )
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile_get_domain", |b| {
        b.iter(|| black_box(compile(black_box(GET_DOMAIN))));
    });

    let cache = PredicateCache::new();
    cache.get_or_compile(GET_DOMAIN).expect("check string compiles");
    c.bench_function("cache_hit_get_domain", |b| {
        b.iter(|| black_box(cache.get_or_compile(black_box(GET_DOMAIN))));
    });
}

fn bench_check_access(c: &mut Criterion) {
    let enforcer = enforcer();
    let allowed = project_request("d1");
    let denied = project_request("d2");

    c.bench_function("check_access_allow", |b| {
        b.iter(|| black_box(enforcer.check_access("identity:get_domain", black_box(&allowed))));
    });

    c.bench_function("check_access_deny", |b| {
        b.iter(|| black_box(enforcer.check_access("identity:get_domain", black_box(&denied))));
    });

    c.bench_function("explain_deny", |b| {
        b.iter(|| black_box(enforcer.explain("identity:get_domain", black_box(&denied))));
    });
}

criterion_group!(benches, bench_compile, bench_check_access);
criterion_main!(benches);
