//! sydbox - ptrace based sandbox for build environments.

mod cli;
mod config;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use sydbox_sandbox::{Policy, SandboxError, Tracer};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::{CONFIG_ENV, Config};

/// Variable holding the log filter when neither `-v` nor `-q` is given.
const LOG_ENV: &str = "SYDBOX_LOG";

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(&cli) {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(e) => {
            error!("{e:#}");
            eprintln!("sydbox: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cli: &Cli) {
    let filter = match cli.log_level() {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_policy(cli: &Cli) -> Result<Policy> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV).map(Into::into));

    let mut policy = match path {
        Some(path) => {
            debug!(path = %path.display(), "loading configuration");
            Config::load(&path)
                .and_then(Config::into_policy)
                .with_context(|| format!("configuration {}", path.display()))?
        }
        None => Policy::new(),
    };
    config::apply_env(&mut policy, |key| std::env::var(key).ok());
    cli.apply(&mut policy).context("command line prefixes")?;
    Ok(policy)
}

fn run(cli: &Cli) -> Result<i32> {
    let policy = load_policy(cli)?;
    let mut tracer = Tracer::new(&policy)?;

    if cli.attach.is_empty() {
        tracer.spawn(cli.command.as_slice())?;
    } else {
        tracer.attach(&cli.attach)?;
    }

    let status = match tracer.run() {
        Ok(status) => status.code(),
        Err(SandboxError::Interrupted(sig)) => {
            info!(signal = sig, "interrupted, traced processes killed");
            128 + sig
        }
        Err(e) => return Err(e.into()),
    };

    let violations = tracer.violations();
    if violations > 0 {
        info!(violations, "access violations reported");
    }
    Ok(status)
}
