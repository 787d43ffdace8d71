use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::Deserialize;
use tracing::debug;
use warden_policy::{ContextSchema, EnforcerConfig};

/// Top-level configuration, loaded from a TOML file.
///
/// # Example
///
/// ```toml
/// [policy]
/// rules = ["policies"]
/// overrides = "/etc/warden/overrides.yaml"
///
/// [enforcer]
/// enforce_new_defaults = true
///
/// [context]
/// required = ["target.domain.id"]
/// optional = ["token.project.domain.id"]
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct WardenConfig {
    /// Where rules and overrides are read from.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Enforcer behaviour.
    #[serde(default)]
    pub enforcer: EnforcerConfig,
    /// Context paths rules may reference. No schema means no path checks.
    pub context: Option<ContextSchema>,
}

/// Rule and override sources.
#[derive(Debug, Default, Deserialize)]
pub struct PolicyConfig {
    /// Policy files or directories.
    #[serde(default)]
    pub rules: Vec<PathBuf>,
    /// Operator override file.
    pub overrides: Option<PathBuf>,
}

impl WardenConfig {
    /// Read a config file. Relative paths inside it are resolved against
    /// the file's directory.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for rules in &mut config.policy.rules {
            *rules = base.join(&*rules);
        }
        if let Some(overrides) = &mut config.policy.overrides {
            *overrides = base.join(&*overrides);
        }
        Ok(config)
    }
}

/// Effective settings after merging the config file with command-line flags.
#[derive(Debug)]
pub struct Settings {
    pub rules: Vec<PathBuf>,
    pub overrides: Option<PathBuf>,
    pub enforcer: EnforcerConfig,
    pub schema: Option<ContextSchema>,
}

impl Settings {
    /// Merge the optional config file with flags; flags win.
    pub fn resolve(
        config: Option<&Path>,
        rules: Vec<PathBuf>,
        overrides: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let config = match config {
            Some(path) => WardenConfig::load(path)?,
            None => WardenConfig::default(),
        };

        let rules = if rules.is_empty() {
            config.policy.rules
        } else {
            rules
        };
        if rules.is_empty() {
            bail!("no policy sources: pass --rules or set [policy] rules in the config file");
        }

        let settings = Self {
            rules,
            overrides: overrides.or(config.policy.overrides),
            enforcer: config.enforcer,
            schema: config.context,
        };
        debug!(?settings, "resolved settings");
        Ok(settings)
    }
}
