//! wardenctl: inspect what the warden safety policy decides.
//!
//! Usage:
//!   wardenctl check-command 'git push --force'
//!   wardenctl check-path ~/.ssh/id_rsa
//!   wardenctl check-path ../outside.txt --root /srv/project
//!   wardenctl --config warden.toml config
//!
//! Check subcommands print the verdict as JSON and exit 0 for Allow,
//! 2 for Confirm, 3 for Block. Any other failure exits 1.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use warden_contracts::{
    config::WardenConfig,
    error::WardenResult,
    policy::{Verdict, VerdictKind},
};
use warden_core::traits::PolicyEngine;
use warden_policy::SafetyPolicyEngine;

// ── CLI definition ────────────────────────────────────────────────────────────

/// Classify commands and write paths with the warden safety policy.
#[derive(Parser)]
#[command(name = "wardenctl", version, about = "Inspect warden safety policy decisions")]
struct Cli {
    /// TOML configuration file. Environment overrides apply on top.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify a shell command line.
    CheckCommand {
        command: String,
    },
    /// Classify a filesystem write target.
    CheckPath {
        path: String,
        /// Block writes that resolve outside this directory.
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML.
    Config,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    // Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("wardenctl: {}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> WardenResult<ExitCode> {
    let config = WardenConfig::load(cli.config.as_deref())?;
    debug!(safety_enabled = config.safety.enabled, "configuration loaded");

    match cli.command {
        Command::CheckCommand { command } => {
            let engine = SafetyPolicyEngine::from_config(&config.safety);
            Ok(report(&engine.evaluate_command(&command)))
        }
        Command::CheckPath { path, root } => {
            let engine = SafetyPolicyEngine::from_config(&config.safety);
            let verdict = match root {
                Some(root) => engine.evaluate_write_path_within(&path, &root),
                None => engine.evaluate_write_path(&path),
            };
            Ok(report(&verdict))
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn report(verdict: &Verdict) -> ExitCode {
    match serde_json::to_string_pretty(verdict) {
        Ok(json) => println!("{}", json),
        Err(_) => println!("{:?}", verdict),
    }
    ExitCode::from(exit_code(verdict.kind))
}

fn exit_code(kind: VerdictKind) -> u8 {
    match kind {
        VerdictKind::Allow => 0,
        VerdictKind::Confirm => 2,
        VerdictKind::Block => 3,
    }
}
