use std::io::Write;
use std::path::PathBuf;

use serde_json::json;
use warden_policy::{
    Credential, Enforcer, EnforcerConfig, PolicyError, RawRequest, RuleOrigin, RuleRegistry,
    RuleSource, TokenScope,
};
use warden_policy_yaml::{YamlFrontend, parse_overrides_file, render_sample};

fn policies_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../../policies")
}

fn load() -> RuleRegistry {
    let mut registry = RuleRegistry::new();
    let loaded = registry
        .load_directory(&policies_dir(), &[&YamlFrontend])
        .unwrap();
    assert_eq!(loaded, registry.len());
    registry
}

fn allowed(enforcer: &Enforcer, operation: &str, raw: &RawRequest) -> bool {
    enforcer.check_access(operation, raw).unwrap().allowed
}

fn system_reader() -> RawRequest {
    RawRequest::new(
        Credential::new()
            .with_role("reader")
            .with_scope(TokenScope::System { scope: "all".into() }),
        json!({}),
    )
}

#[test]
fn shipped_policies_finalize() {
    let registry = load();
    let get_domain = registry.rule("identity:get_domain").unwrap();
    assert!(matches!(
        &get_domain.source,
        RuleSource::File { file: Some(f) } if f.ends_with("domain.yaml")
    ));
    assert!(get_domain.deprecated.as_ref().unwrap().reason.starts_with("As of the Stein release"));

    let enforcer = Enforcer::new(registry, EnforcerConfig::default()).unwrap();
    let origins: Vec<(&str, &RuleOrigin)> = enforcer
        .registry()
        .effective_rules()
        .unwrap()
        .into_iter()
        .map(|r| (r.name.as_str(), &r.origin))
        .collect();
    let fallbacks = origins
        .iter()
        .filter(|(_, origin)| matches!(origin, RuleOrigin::DeprecatedFallback { .. }))
        .count();
    assert_eq!(fallbacks, 5);

    assert!(allowed(&enforcer, "identity:list_domains", &system_reader()));
    assert!(!allowed(&enforcer, "identity:delete_domain", &system_reader()));
}

#[test]
fn override_file_applies() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "\"identity:list_domains\": \"role:auditor\"").unwrap();
    writeln!(file, "\"readonly\": \"role:reader or role:auditor\"").unwrap();

    let mut registry = load();
    for (name, rule) in parse_overrides_file(file.path()).unwrap() {
        registry.set_override(name, rule).unwrap();
    }
    let enforcer = Enforcer::new(registry, EnforcerConfig::default()).unwrap();

    let rule = enforcer.registry().resolve("identity:list_domains").unwrap();
    assert_eq!(rule.check_str, "role:auditor");
    assert!(matches!(&rule.origin, RuleOrigin::Override { file: Some(_) }));
    assert!(matches!(
        enforcer.registry().resolve("readonly").unwrap().origin,
        RuleOrigin::Custom { .. }
    ));

    assert!(!allowed(&enforcer, "identity:list_domains", &system_reader()));
}

#[test]
fn sample_covers_every_rule() {
    let registry = load();
    let sample = render_sample(registry.rules());
    for rule in registry.rules() {
        assert!(sample.contains(&format!("#\"{}\":", rule.name)), "{}", rule.name);
    }
}

#[test]
fn missing_directory_is_a_load_error() {
    let mut registry = RuleRegistry::new();
    let err = registry
        .load_directory(&policies_dir().join("nope"), &[&YamlFrontend])
        .unwrap_err();
    assert!(matches!(err, PolicyError::Load(_)));
}

#[test]
fn duplicate_across_files_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let rule = "rules:\n  - name: admin_required\n    check_str: \"role:admin\"\n";
    std::fs::write(dir.path().join("a.yaml"), rule).unwrap();
    std::fs::write(dir.path().join("b.yml"), rule).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let mut registry = RuleRegistry::new();
    let err = registry
        .load_directory(dir.path(), &[&YamlFrontend])
        .unwrap_err();
    assert!(matches!(err, PolicyError::DuplicateRule(name) if name == "admin_required"));
}
