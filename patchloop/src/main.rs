//! `patchloop`: turn a natural-language request into a tested pull request.
//!
//! Configuration lives in `.patchloop/config.toml` of the target repository;
//! run artifacts land in `.patchloop/runs/<run-id>/`.

use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::warn;

use patchloop::exit_codes;
use patchloop::io::config::{AppConfig, default_config_path, load_config, missing_env};
use patchloop::io::run_log::{RunLog, new_run_id};
use patchloop::logging;
use patchloop::orchestrator::{Collaborators, Orchestrator, RunOptions, WorkflowSettings};
use patchloop::summary::RunSummary;

#[derive(Parser, Debug)]
#[command(
    name = "patchloop",
    version,
    about = "Plan, implement, test and publish a code change from a request"
)]
struct Cli {
    /// The change to make. Read from stdin when omitted.
    request: Vec<String>,

    /// Iteration budget for planning and fix cycles.
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Stop at the first failing test run instead of attempting fixes.
    #[arg(long)]
    no_auto_fix: bool,

    /// Consult the reasoning model for planning and deep debugging.
    #[arg(long)]
    reasoning: bool,

    /// Print the run summary as JSON.
    #[arg(long)]
    json: bool,

    /// Repository to operate on.
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Config file (defaults to `<repo>/.patchloop/config.toml`).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply_overrides(&self, cfg: &mut AppConfig) {
        if let Some(max) = self.max_iterations {
            cfg.max_iterations = max;
        }
        if self.no_auto_fix {
            cfg.enable_auto_fix = false;
        }
        if self.reasoning {
            cfg.enable_reasoning = true;
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(exit_codes::INVALID);
    }
}

fn run() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| default_config_path(&cli.repo));
    let mut cfg = load_config(&config_path)?;
    cli.apply_overrides(&mut cfg);
    cfg.validate().context("invalid command-line overrides")?;

    let request = if cli.request.is_empty() {
        read_request()?
    } else {
        cli.request.join(" ")
    };
    let request = request.trim();
    if request.is_empty() {
        bail!("request must not be empty");
    }

    let missing = missing_env(&cfg.required_env, |name| std::env::var(name).ok());
    if !missing.is_empty() {
        bail!(
            "missing required environment variables: {}",
            missing.join(", ")
        );
    }

    let run_id = new_run_id();
    let run_log = RunLog::create(&cli.repo, &run_id)?;
    let collab = Collaborators::production(&cli.repo, &cfg, Some(run_log.dir()));
    let orchestrator =
        Orchestrator::new(collab, WorkflowSettings::from_config(&cfg)).with_run_log(run_log);
    install_interrupt_handler(orchestrator.cancel_flag())?;
    let outcome = orchestrator.run(request, RunOptions::from_config(&cfg))?;

    let summary = RunSummary::from_outcome(&outcome, Some(&run_id));
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("serialize summary")?
        );
    } else {
        print!("{}", summary.render_text());
    }
    Ok(())
}

/// Raise `cancel` on the first Ctrl-C so the run stops at the next node
/// boundary and still reports. A second Ctrl-C exits immediately.
fn install_interrupt_handler(cancel: Arc<AtomicBool>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build signal runtime")?;
    #[cfg(unix)]
    let mut interrupts = {
        use tokio::signal::unix::{SignalKind, signal};
        let _guard = runtime.enter();
        signal(SignalKind::interrupt()).context("install SIGINT handler")?
    };

    thread::Builder::new()
        .name("patchloop-signal".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                loop {
                    #[cfg(unix)]
                    let received = interrupts.recv().await.is_some();
                    #[cfg(not(unix))]
                    let received = tokio::signal::ctrl_c().await.is_ok();
                    if !received {
                        return;
                    }
                    if cancel.swap(true, Ordering::SeqCst) {
                        std::process::exit(exit_codes::INTERRUPTED);
                    }
                    warn!("interrupt received, stopping after the current node");
                }
            });
        })
        .context("spawn signal thread")?;
    Ok(())
}

/// Prompt on a terminal, otherwise take all of stdin.
fn read_request() -> Result<String> {
    let stdin = io::stdin();
    let mut request = String::new();
    if stdin.is_terminal() {
        eprint!("Enter your request: ");
        io::stderr().flush().context("flush prompt")?;
        stdin.read_line(&mut request).context("read request")?;
    } else {
        stdin
            .lock()
            .read_to_string(&mut request)
            .context("read request from stdin")?;
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_words() {
        let cli = Cli::parse_from(["patchloop", "add", "a", "health", "endpoint"]);
        assert_eq!(cli.request.join(" "), "add a health endpoint");
        assert_eq!(cli.repo, PathBuf::from("."));
        assert!(!cli.json);
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "patchloop",
            "--max-iterations",
            "3",
            "--no-auto-fix",
            "--reasoning",
            "--json",
            "fix login",
        ]);
        let mut cfg = AppConfig::default();
        cli.apply_overrides(&mut cfg);
        assert_eq!(cfg.max_iterations, 3);
        assert!(!cfg.enable_auto_fix);
        assert!(cfg.enable_reasoning);
        assert!(cli.json);
    }

    #[test]
    fn no_flags_keep_config() {
        let cli = Cli::parse_from(["patchloop"]);
        assert!(cli.request.is_empty());
        let mut cfg = AppConfig::default();
        cli.apply_overrides(&mut cfg);
        assert_eq!(cfg, AppConfig::default());
    }
}
