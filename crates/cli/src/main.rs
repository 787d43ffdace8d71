//! Warden CLI
//!
//! Evaluate, inspect and lint policy rule sets from the command line.

mod commands;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::Settings;

/// Warden CLI: evaluate and inspect access policies.
#[derive(Parser, Debug)]
#[command(name = "warden", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "WARDEN_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Policy file or directory; repeatable. Replaces `[policy] rules`.
    #[arg(long = "rules", global = true)]
    rules: Vec<PathBuf>,

    /// Operator override file. Replaces `[policy] overrides`.
    #[arg(long, global = true)]
    overrides: Option<PathBuf>,

    /// Output format.
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decide a request; exits 0 on allow and 2 on deny.
    Check(commands::check::CheckArgs),
    /// Decide a request and print every evaluated atom.
    Explain(commands::check::CheckArgs),
    /// List effective rules.
    List,
    /// Load and validate the rule set.
    Lint,
    /// Print a commented override-file template.
    Sample,
}

fn main() -> anyhow::Result<ExitCode> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::resolve(cli.config.as_deref(), cli.rules, cli.overrides)?;

    match cli.command {
        Command::Check(args) => commands::check::run(&settings, &args, &cli.format, false),
        Command::Explain(args) => commands::check::run(&settings, &args, &cli.format, true),
        Command::List => commands::list::run(&settings, &cli.format),
        Command::Lint => commands::lint::run(&settings, &cli.format),
        Command::Sample => commands::sample::run(&settings, &cli.format),
    }
}
