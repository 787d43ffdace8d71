use std::fmt::Write;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Args;
use warden_policy::{AtomOutcome, Decision, RawRequest};

use crate::OutputFormat;
use crate::commands::load_enforcer;
use crate::config::Settings;

/// Exit status for a denied request.
const EXIT_DENIED: u8 = 2;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Operation (rule name), e.g. `identity:get_domain`.
    pub operation: String,
    /// JSON request with `credential` and `target`; `-` reads stdin.
    #[arg(long)]
    pub request: PathBuf,
}

pub fn run(
    settings: &Settings,
    args: &CheckArgs,
    format: &OutputFormat,
    explain: bool,
) -> anyhow::Result<ExitCode> {
    let decision = decide(settings, args, explain)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&decision)?),
        OutputFormat::Text => print!("{}", render(&decision)),
    }
    Ok(ExitCode::from(exit_status(&decision)))
}

fn decide(settings: &Settings, args: &CheckArgs, explain: bool) -> anyhow::Result<Decision> {
    let enforcer = load_enforcer(settings)?;
    let raw = read_request(&args.request)?;

    let decision = if explain {
        enforcer.explain(&args.operation, &raw)?
    } else {
        enforcer.check_access(&args.operation, &raw)?
    };
    Ok(decision)
}

fn exit_status(decision: &Decision) -> u8 {
    if decision.allowed { 0 } else { EXIT_DENIED }
}

fn read_request(path: &Path) -> anyhow::Result<RawRequest> {
    let content = if path.as_os_str() == "-" {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("cannot read request from stdin")?;
        content
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("cannot read request {}", path.display()))?
    };
    serde_json::from_str(&content).context("invalid request JSON")
}

fn render(decision: &Decision) -> String {
    let verdict = if decision.allowed { "ALLOW" } else { "DENY" };
    let mut out = format!(
        "{verdict} {} (origin: {}, {})\n",
        decision.rule, decision.origin, decision.reason
    );
    for entry in decision.trace.iter().flatten() {
        let detail = match &entry.outcome {
            AtomOutcome::Missing { path, required } => {
                let kind = if *required { "required " } else { "" };
                format!(" ({kind}path {path} missing)")
            }
            AtomOutcome::Error { message } => format!(" ({message})"),
            AtomOutcome::Matched | AtomOutcome::NotMatched => String::new(),
        };
        let _ = writeln!(
            out,
            "  {:<12} {} [{}]{detail}",
            entry.outcome.as_str(),
            entry.atom,
            entry.rule
        );
    }
    out
}
