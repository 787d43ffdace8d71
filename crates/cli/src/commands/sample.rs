use std::process::ExitCode;

use warden_policy::RuleDefinition;
use warden_policy_yaml::render_sample;

use crate::OutputFormat;
use crate::commands::load_registry;
use crate::config::Settings;

pub fn run(settings: &Settings, format: &OutputFormat) -> anyhow::Result<ExitCode> {
    let registry = load_registry(settings)?;

    match format {
        OutputFormat::Json => {
            let rules: Vec<&RuleDefinition> = registry.rules().collect();
            println!("{}", serde_json::to_string_pretty(&rules)?);
        }
        OutputFormat::Text => print!("{}", render_sample(registry.rules())),
    }
    Ok(ExitCode::SUCCESS)
}
