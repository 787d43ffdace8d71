pub mod check;
pub mod lint;
pub mod list;
pub mod sample;

use anyhow::Context;
use tracing::debug;
use warden_policy::{Enforcer, PolicyFrontend, RuleRegistry};
use warden_policy_yaml::{YamlFrontend, parse_overrides_file};

use crate::config::Settings;

/// Load every rule source and the override file into a fresh registry.
pub fn load_registry(settings: &Settings) -> anyhow::Result<RuleRegistry> {
    let mut registry = match &settings.schema {
        Some(schema) => RuleRegistry::new().with_schema(schema.clone()),
        None => RuleRegistry::new(),
    };

    for path in &settings.rules {
        let result = if path.is_dir() {
            registry.load_directory(path, &[&YamlFrontend])
        } else {
            YamlFrontend
                .parse_file(path)
                .and_then(|rules| registry.register_all(rules))
        };
        let loaded =
            result.with_context(|| format!("cannot load rules from {}", path.display()))?;
        debug!(path = %path.display(), rules = loaded, "loaded rule source");
    }

    if let Some(path) = &settings.overrides {
        for (name, rule) in parse_overrides_file(path)? {
            registry.set_override(name, rule)?;
        }
    }
    Ok(registry)
}

/// Load and finalize the rule set into an enforcer.
pub fn load_enforcer(settings: &Settings) -> anyhow::Result<Enforcer> {
    let registry = load_registry(settings)?;
    Ok(Enforcer::new(registry, settings.enforcer.clone())?)
}
