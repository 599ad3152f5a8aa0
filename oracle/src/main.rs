//! Command-line entry point for oracle.
//!
//! `run` drives the interactive phase loop, `auto` the sandboxed autonomous
//! generator. The remaining subcommands inspect or clear saved state and need
//! no credentials.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::debug;

use oracle::autonomous::{AutoCollaborators, AutoOutcome, run_autonomous};
use oracle::core::history::render_history;
use oracle::core::machine::ExecutionMachine;
use oracle::core::types::SessionState;
use oracle::execute::{Collaborators, RunOutcome, open_session, run_session};
use oracle::exit_codes;
use oracle::io::config::{Credentials, OracleConfig, load_config};
use oracle::io::console::StdPrompter;
use oracle::io::github::GithubClient;
use oracle::io::llm::{ChatClient, Completion};
use oracle::io::sandbox::{Sandbox, SandboxLimits, SecurityViolation};
use oracle::io::snapshot::{SNAPSHOT_FILE, SnapshotStore};
use oracle::io::state_store::{LoadOutcome, StateStore};
use oracle::logging;

const CONFIG_FILE: &str = "config.toml";

#[derive(Parser)]
#[command(
    name = "oracle",
    version,
    about = "Resumable phase-by-phase project execution with a sandboxed autonomous mode"
)]
struct Cli {
    /// Directory holding the session file, the archive and `config.toml`.
    #[arg(long, global = true, default_value = ".oracle_data")]
    data_dir: PathBuf,
    /// Debug diagnostics on stderr (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan and execute phases interactively, resuming a saved session.
    Run,
    /// Generate a project file by file inside a sandboxed workspace.
    Auto {
        /// Snapshot file used to resume an interrupted run.
        #[arg(long, default_value = SNAPSHOT_FILE)]
        snapshot: PathBuf,
    },
    /// Print where the saved session stands.
    Status,
    /// Print the phase history of the saved session.
    History,
    /// Move the saved session into the archive.
    Archive,
    /// Delete the saved session.
    Reset,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => report(&err),
    };
    process::exit(code);
}

fn report(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<SecurityViolation>().is_some() {
        eprintln!("security violation: {err:#}");
        exit_codes::SECURITY
    } else {
        eprintln!("{err:#}");
        exit_codes::INVALID
    }
}

fn run(cli: Cli) -> Result<i32> {
    let store = StateStore::new(&cli.data_dir);
    match cli.command {
        Command::Run => cmd_run(&store),
        Command::Auto { snapshot } => cmd_auto(&store, &snapshot),
        Command::Status => cmd_status(&store),
        Command::History => cmd_history(&store),
        Command::Archive => cmd_archive(&store),
        Command::Reset => cmd_reset(&store),
    }
}

/// Credentials plus the validated config they feed into.
fn bootstrap(store: &StateStore) -> Result<(Credentials, OracleConfig)> {
    let credentials = Credentials::from_env()?;
    let config =
        load_config(&store.data_dir().join(CONFIG_FILE))?.with_model_override(&credentials);
    config.validate()?;
    debug!(?credentials, model = %config.model_name, "bootstrapped");
    Ok((credentials, config))
}

fn cmd_run(store: &StateStore) -> Result<i32> {
    let (credentials, config) = bootstrap(store)?;
    let llm = ChatClient::new(&config, &credentials.groq_api_key)?;
    let github = GithubClient::new(&config, credentials.github_token.clone())?;
    let project_dir = std::env::current_dir().context("resolve current directory")?;
    let mut prompter = StdPrompter;

    let Some(mut session) = open_session(store, &config, &mut prompter, Utc::now())? else {
        println!("Nothing to do.");
        return Ok(exit_codes::DECLINED);
    };
    let collab = Collaborators {
        llm: &llm,
        host: &github,
        judge: config.semantic_verification.then_some(&llm as &dyn Completion),
        project_dir: &project_dir,
        config: &config,
        clock: Utc::now,
    };
    match run_session(&mut session, &collab, &mut prompter)? {
        RunOutcome::Declined => Ok(exit_codes::DECLINED),
        RunOutcome::Completed { .. } | RunOutcome::Interrupted => Ok(exit_codes::OK),
    }
}

fn cmd_auto(store: &StateStore, snapshot: &Path) -> Result<i32> {
    let (credentials, config) = bootstrap(store)?;
    let llm = ChatClient::new(&config, &credentials.groq_api_key)?;
    let github = GithubClient::new(&config, credentials.github_token.clone())?;
    let tool_root = std::env::current_dir().context("resolve current directory")?;
    let mut sandbox = Sandbox::new(&tool_root, SandboxLimits::from_config(&config))?;
    let snapshots = SnapshotStore::new(snapshot);
    let mut prompter = StdPrompter;

    let collab = AutoCollaborators {
        llm: &llm,
        issues: &github,
        config: &config,
    };
    match run_autonomous(&mut sandbox, &snapshots, &collab, &mut prompter)? {
        AutoOutcome::Declined => Ok(exit_codes::DECLINED),
        AutoOutcome::Pushed { .. } | AutoOutcome::Interrupted => Ok(exit_codes::OK),
    }
}

/// The saved session, or the exit code to stop with.
fn saved_session(store: &StateStore) -> Result<SessionState, i32> {
    match store.load() {
        LoadOutcome::Loaded(state) => Ok(state),
        LoadOutcome::Missing => {
            println!("No saved session.");
            Err(exit_codes::OK)
        }
        LoadOutcome::Corrupt(reason) => {
            eprintln!("saved session is unreadable: {reason}");
            Err(exit_codes::INVALID)
        }
    }
}

fn cmd_status(store: &StateStore) -> Result<i32> {
    let state = match saved_session(store) {
        Ok(state) => state,
        Err(code) => return Ok(code),
    };
    let machine = ExecutionMachine::from_session(state);
    let state = machine.session();
    println!("Project: {}", state.project);
    println!("Status: {}", state.status.as_str());
    if !state.repo_url.is_empty() {
        println!("Repository: {}", state.repo_url);
    }
    match machine.current_label() {
        Some(label) => {
            println!(
                "Phase {} of {}: {}",
                state.current_phase + 1,
                state.phases.len(),
                label.name
            );
            let stats = machine.current_stats();
            println!(
                "Tasks: {}/{} ({:.0}%)",
                stats.completed, stats.total, stats.percentage
            );
        }
        None if state.is_complete() => println!("All {} phases completed.", state.phases.len()),
        None => println!("No plan approved yet."),
    }
    println!("Verified phases: {}", machine.completed_phase_count());
    Ok(exit_codes::OK)
}

fn cmd_history(store: &StateStore) -> Result<i32> {
    let state = match saved_session(store) {
        Ok(state) => state,
        Err(code) => return Ok(code),
    };
    let lines = render_history(&state.phase_history);
    if lines.is_empty() {
        println!("No history yet.");
    }
    for line in lines {
        println!("{line}");
    }
    Ok(exit_codes::OK)
}

fn cmd_archive(store: &StateStore) -> Result<i32> {
    let state = match saved_session(store) {
        Ok(state) => state,
        Err(code) => return Ok(code),
    };
    if let Some(path) = store.archive(&state, Utc::now())? {
        println!("Session archived to {}", path.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_reset(store: &StateStore) -> Result<i32> {
    if !store.exists() {
        println!("No saved session.");
        return Ok(exit_codes::OK);
    }
    store.clear()?;
    println!("Saved session deleted.");
    Ok(exit_codes::OK)
}
