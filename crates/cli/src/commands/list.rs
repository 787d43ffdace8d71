use std::process::ExitCode;

use warden_policy::{EffectiveRule, ScopeType};

use crate::OutputFormat;
use crate::commands::load_enforcer;
use crate::config::Settings;

pub fn run(settings: &Settings, format: &OutputFormat) -> anyhow::Result<ExitCode> {
    let enforcer = load_enforcer(settings)?;
    let rules = enforcer.registry().effective_rules()?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rules)?);
        }
        OutputFormat::Text => {
            println!("{} effective rules:", rules.len());
            for rule in &rules {
                println!("{}", render(rule));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn render(rule: &EffectiveRule) -> String {
    let scopes = if rule.scope_types.is_empty() {
        "any".to_owned()
    } else {
        rule.scope_types
            .iter()
            .map(ScopeType::as_str)
            .collect::<Vec<_>>()
            .join(",")
    };
    format!(
        "  {name} [{origin}] scopes={scopes}\n    {check}",
        name = rule.name,
        origin = rule.origin,
        check = rule.check_str,
    )
}
