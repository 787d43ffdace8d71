use std::fmt::Write;

use warden_policy::{RuleDefinition, ScopeType};

/// Render a commented override-file template documenting every rule.
///
/// Each default is written commented out, so the output is a valid, empty
/// override file that operators uncomment entries from.
pub fn render_sample<'a>(rules: impl IntoIterator<Item = &'a RuleDefinition>) -> String {
    let mut out = String::new();
    for rule in rules {
        render_rule(&mut out, rule);
    }
    out
}

fn render_rule(out: &mut String, rule: &RuleDefinition) {
    if let Some(description) = &rule.description {
        for line in description.lines() {
            let _ = writeln!(out, "# {line}");
        }
    }
    for op in &rule.operations {
        let _ = writeln!(out, "# {:<8}{}", op.method, op.path);
    }
    if !rule.scope_types.is_empty() {
        let scopes: Vec<&str> = rule.scope_types.iter().map(ScopeType::as_str).collect();
        let _ = writeln!(out, "# Intended scope(s): {}", scopes.join(", "));
    }
    let _ = writeln!(out, "#{}: {}", quote(&rule.name), quote(&rule.check_str));

    if let Some(link) = &rule.deprecated {
        let _ = writeln!(out, "# DEPRECATED");
        let since = if link.since.is_empty() {
            String::new()
        } else {
            format!(" since {}", link.since)
        };
        let _ = writeln!(
            out,
            "# {}: {} has been deprecated{since} in favor of {}: {}.",
            quote(&link.name),
            quote(&link.check_str),
            quote(&rule.name),
            quote(&rule.check_str),
        );
        for line in link.reason.lines() {
            let _ = writeln!(out, "# {line}");
        }
    }
    out.push('\n');
}

/// Double-quoted scalar, valid in both YAML and JSON.
fn quote(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}
