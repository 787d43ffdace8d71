use std::process::ExitCode;

use serde::Serialize;
use warden_policy::{PolicyError, RuleOrigin};

use crate::OutputFormat;
use crate::commands::load_enforcer;
use crate::config::Settings;

/// Outcome of linting a rule set.
#[derive(Debug, Serialize)]
struct LintReport {
    ok: bool,
    rules: usize,
    overrides: usize,
    deprecated_fallbacks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(settings: &Settings, format: &OutputFormat) -> anyhow::Result<ExitCode> {
    let report = lint(settings);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => match &report.error {
            None => println!(
                "OK: {} rules ({} overridden, {} with deprecated fallbacks)",
                report.rules, report.overrides, report.deprecated_fallbacks
            ),
            Some(error) => println!("FAILED: {error}"),
        },
    }
    Ok(if report.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn lint(settings: &Settings) -> LintReport {
    match load_enforcer(settings) {
        Ok(enforcer) => {
            let rules = enforcer.registry().effective_rules().unwrap_or_default();
            let overrides = rules
                .iter()
                .filter(|rule| {
                    matches!(
                        rule.origin,
                        RuleOrigin::Override { .. } | RuleOrigin::Custom { .. }
                    )
                })
                .count();
            let deprecated_fallbacks = rules
                .iter()
                .filter(|rule| matches!(rule.origin, RuleOrigin::DeprecatedFallback { .. }))
                .count();
            LintReport {
                ok: true,
                rules: rules.len(),
                overrides,
                deprecated_fallbacks,
                error: None,
            }
        }
        Err(e) => {
            let kind = match e.downcast_ref::<PolicyError>() {
                Some(err) if err.is_startup_error() => "configuration error",
                _ => "error",
            };
            LintReport {
                ok: false,
                rules: 0,
                overrides: 0,
                deprecated_fallbacks: 0,
                error: Some(format!("{kind}: {e:#}")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{RULES, settings};

    #[test]
    fn clean_rule_set() {
        let dir = tempfile::tempdir().unwrap();
        let report = lint(&settings(&dir, RULES));
        assert!(report.ok);
        assert_eq!(report.rules, 2);
        assert_eq!(report.deprecated_fallbacks, 1);
        assert_eq!(report.overrides, 0);
    }

    #[test]
    fn undefined_reference_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let report = lint(&settings(
            &dir,
            "rules:\n  - name: a\n    check_str: \"rule:missing\"\n",
        ));
        assert!(!report.ok);
        assert_eq!(
            report.error.as_deref(),
            Some("configuration error: rule 'a' references undefined rule 'missing'")
        );
    }

    #[test]
    fn deeply_nested_override_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(&dir, RULES);
        let overrides = dir.path().join("overrides.yaml");
        let nested = format!("{}@{}", "(".repeat(2000), ")".repeat(2000));
        std::fs::write(&overrides, format!("admin_required: \"{nested}\"\n")).unwrap();
        settings.overrides = Some(overrides);

        let report = lint(&settings);
        assert!(!report.ok);
        let error = report.error.unwrap();
        let expected = "configuration error: invalid check string for rule 'admin_required'";
        assert!(error.starts_with(expected), "{error}");
        assert!(error.contains("nested deeper than 64 levels at offset 64"), "{error}");
    }
}
