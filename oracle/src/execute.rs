//! Interactive phase execution.
//!
//! Drives a [`PhaseSession`] from setup to completion, one operator command at
//! a time. Every failure is reported as a line of output and the loop carries
//! on; end of input stops the loop with the session already on disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::agents::planner::generate_phases;
use crate::agents::task_expander::{PhaseTaskRequest, expand_phase};
use crate::agents::verifier::Verifier;
use crate::core::commands::{HELP, LoopCommand, parse_command};
use crate::core::history::{render_history, rollback_choices};
use crate::core::ledger;
use crate::core::machine::{MachineState, TransitionError};
use crate::core::phase_label::{PhaseLabel, expected_commit_message};
use crate::core::types::ProjectBrief;
use crate::io::config::OracleConfig;
use crate::io::console::{Prompter, ask_required, confirm};
use crate::io::git::Git;
use crate::io::github::{RepoHost, parse_repo_url};
use crate::io::llm::Completion;
use crate::io::repo_context;
use crate::io::state_store::StateStore;
use crate::session::{Opened, PhaseSession};

/// External collaborators of the phase loop.
pub struct Collaborators<'a> {
    pub llm: &'a dyn Completion,
    pub host: &'a dyn RepoHost,
    /// Semantic reviewer for verification; `None` disables the review.
    pub judge: Option<&'a dyn Completion>,
    /// Project directory whose file tree and diff feed task generation.
    pub project_dir: &'a Path,
    pub config: &'a OracleConfig,
    pub clock: fn() -> DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { archived: Option<PathBuf> },
    /// Input ended; progress so far is saved.
    Interrupted,
    Declined,
}

enum Flow {
    Continue,
    Stop(RunOutcome),
}

enum Handled {
    Stay,
    PhaseChanged,
    Interrupted,
}

/// Resume a saved session or start a new one. `None` when the operator
/// declined both.
pub fn open_session(
    store: &StateStore,
    config: &OracleConfig,
    prompter: &mut dyn Prompter,
    now: DateTime<Utc>,
) -> Result<Option<PhaseSession>> {
    let limit = config.max_verification_attempts;
    match PhaseSession::open(store.clone(), limit) {
        Opened::Fresh(session) => Ok(Some(session)),
        Opened::Recovered { session, reason } => {
            prompter.say(&format!(
                "Saved session could not be read ({reason}); starting a new session."
            ));
            Ok(Some(session))
        }
        Opened::Saved(state) => {
            prompter.say(&format!(
                "Found a saved session for '{}' at phase {} of {}.",
                state.project,
                (state.current_phase + 1).min(state.phases.len().max(1)),
                state.phases.len()
            ));
            match confirm(prompter, "Resume it?")? {
                Some(true) => return Ok(Some(PhaseSession::resume(store.clone(), state, limit))),
                Some(false) => {}
                None => return Ok(None),
            }
            if confirm(prompter, "Start a new session? The saved one will be archived.")?
                != Some(true)
            {
                return Ok(None);
            }
            let (session, archived) = PhaseSession::start_over(store.clone(), &state, limit, now)?;
            if let Some(path) = archived {
                prompter.say(&format!("Previous session archived to {}", path.display()));
            }
            Ok(Some(session))
        }
    }
}

/// Run the session until every phase is verified, the operator declines, or
/// input ends.
#[instrument(skip_all)]
pub fn run_session(
    session: &mut PhaseSession,
    collab: &Collaborators<'_>,
    prompter: &mut dyn Prompter,
) -> Result<RunOutcome> {
    loop {
        let state = session.machine().state().clone();
        let flow = match state {
            MachineState::Setup => setup(session, prompter)?,
            MachineState::Planning | MachineState::AwaitingApproval => {
                plan(session, collab, prompter)?
            }
            MachineState::InProgress(_) if session.state().repo_url.is_empty() => {
                ask_repo_url(session, prompter)?
            }
            MachineState::InProgress(_) => run_phase(session, collab, prompter)?,
            MachineState::Completed => return finish(session, collab, prompter),
        };
        if let Flow::Stop(outcome) = flow {
            info!(?outcome, "phase loop stopped");
            return Ok(outcome);
        }
    }
}

fn setup(session: &mut PhaseSession, prompter: &mut dyn Prompter) -> Result<Flow> {
    let mut answers = Vec::with_capacity(4);
    for question in [
        "What are you building?",
        "Tech stack:",
        "Core features:",
        "Target platform:",
    ] {
        match ask_required(prompter, question)? {
            Some(answer) => answers.push(answer),
            None => return Ok(Flow::Stop(RunOutcome::Interrupted)),
        }
    }
    let [project, tech, features, platform]: [String; 4] = answers
        .try_into()
        .map_err(|_| anyhow::anyhow!("setup answers incomplete"))?;
    session.configure(ProjectBrief {
        project,
        tech,
        features,
        platform,
    })?;
    Ok(Flow::Continue)
}

fn plan(
    session: &mut PhaseSession,
    collab: &Collaborators<'_>,
    prompter: &mut dyn Prompter,
) -> Result<Flow> {
    prompter.say("Generating phases...");
    match generate_phases(collab.llm, &session.state().brief()) {
        Ok(phases) if !phases.is_empty() => {
            session.propose_plan(phases.clone())?;
            prompter.say("Proposed phases:");
            for line in &phases {
                prompter.say(&format!("  {line}"));
            }
            match confirm(prompter, "Approve this plan?")? {
                Some(true) => {
                    session.approve_plan(phases)?;
                    return Ok(Flow::Continue);
                }
                Some(false) => {}
                None => return Ok(Flow::Stop(RunOutcome::Interrupted)),
            }
        }
        Ok(_) => prompter.say("The model returned no phases."),
        Err(err) => {
            warn!(error = %err, "phase generation failed");
            prompter.say(&format!("Phase generation failed: {err:#}"));
        }
    }
    Ok(match confirm(prompter, "Generate a new plan?")? {
        Some(true) => Flow::Continue,
        Some(false) => Flow::Stop(RunOutcome::Declined),
        None => Flow::Stop(RunOutcome::Interrupted),
    })
}

fn ask_repo_url(session: &mut PhaseSession, prompter: &mut dyn Prompter) -> Result<Flow> {
    let question = "GitHub repository URL (https://github.com/owner/repo):";
    let Some(url) = ask_required(prompter, question)? else {
        return Ok(Flow::Stop(RunOutcome::Interrupted));
    };
    if let Err(err) = parse_repo_url(&url) {
        prompter.say(&err.to_string());
        return Ok(Flow::Continue);
    }
    session.set_repo_url(&url)?;
    Ok(Flow::Continue)
}

fn run_phase(
    session: &mut PhaseSession,
    collab: &Collaborators<'_>,
    prompter: &mut dyn Prompter,
) -> Result<Flow> {
    let Some(label) = session.machine().current_label() else {
        bail!("session is in progress but has no phase to run");
    };
    let phase = session.state().current_phase;
    let now = (collab.clock)();
    if ledger::has_tasks(session.state(), phase) {
        session.begin_phase::<&str>(&[], now)?;
    } else {
        let tasks = generate_tasks(session, collab, &label, prompter);
        session.begin_phase(&tasks, now)?;
    }

    prompter.say("");
    prompter.say(&format!(
        "Phase {} of {}: {}",
        phase + 1,
        session.state().phases.len(),
        label.name
    ));
    print_tasks(session, prompter);
    prompter.say(&format!(
        "Expected commit message: {}",
        expected_commit_message(&label)
    ));
    prompter.say(
        "Push a commit with that message, then type 'next-phase'. Type 'help' for all commands.",
    );

    loop {
        let Some(input) = prompter.ask(">")? else {
            return Ok(Flow::Stop(RunOutcome::Interrupted));
        };
        if input.is_empty() {
            continue;
        }
        let command = match parse_command(&input) {
            Ok(command) => command,
            Err(err) => {
                prompter.say(&err.to_string());
                continue;
            }
        };
        debug!(?command, "command");
        match handle(session, collab, prompter, command, &label)? {
            Handled::Stay => {}
            Handled::PhaseChanged => return Ok(Flow::Continue),
            Handled::Interrupted => return Ok(Flow::Stop(RunOutcome::Interrupted)),
        }
    }
}

fn generate_tasks(
    session: &PhaseSession,
    collab: &Collaborators<'_>,
    label: &PhaseLabel,
    prompter: &mut dyn Prompter,
) -> Vec<String> {
    let cfg = collab.config;
    let state = session.state();
    let git = Git::new(
        collab.project_dir,
        Duration::from_secs(cfg.git_timeout_secs),
        cfg.git_output_limit_bytes,
    );
    let context = repo_context::gather(&git, cfg.diff_context_limit_bytes);
    let brief = state.brief();
    let phase_line = state
        .phases
        .get(state.current_phase)
        .map(String::as_str)
        .unwrap_or_default();

    prompter.say(&format!("Generating tasks for {phase_line}..."));
    let request = PhaseTaskRequest {
        phase_line,
        label,
        brief: &brief,
        context: &context,
    };
    match expand_phase(collab.llm, &request) {
        Ok(generated) if !generated.tasks.is_empty() => generated.tasks,
        Ok(_) => {
            prompter
                .say("No tasks were generated. Add tasks with 'add-task' or type 'retry-phase'.");
            Vec::new()
        }
        Err(err) => {
            warn!(error = %err, "task generation failed");
            prompter.say(&format!(
                "Task generation failed: {err:#}. Add tasks with 'add-task' or type 'retry-phase'."
            ));
            Vec::new()
        }
    }
}

fn handle(
    session: &mut PhaseSession,
    collab: &Collaborators<'_>,
    prompter: &mut dyn Prompter,
    command: LoopCommand,
    label: &PhaseLabel,
) -> Result<Handled> {
    let now = (collab.clock)();
    match command {
        LoopCommand::Help => {
            for line in HELP.lines() {
                prompter.say(line);
            }
        }
        LoopCommand::ListTasks => print_tasks(session, prompter),
        LoopCommand::Mark(index) => {
            if report(prompter, session.mark_complete(index, now))?.is_some() {
                prompter.say(&format!("Task {} marked complete.", index + 1));
                print_progress(session, prompter);
            }
        }
        LoopCommand::Unmark(index) => {
            if report(prompter, session.mark_incomplete(index))?.is_some() {
                prompter.say(&format!("Task {} marked incomplete.", index + 1));
                print_progress(session, prompter);
            }
        }
        LoopCommand::AddTask => {
            let Some(description) = prompter.ask("Task description:")? else {
                return Ok(Handled::Interrupted);
            };
            if let Some(index) = report(prompter, session.add_task(&description))? {
                prompter.say(&format!("Added task {}.", index + 1));
            }
        }
        LoopCommand::EditTask(index) => {
            let Some(description) = prompter.ask("New description:")? else {
                return Ok(Handled::Interrupted);
            };
            if report(prompter, session.edit_task(index, &description))?.is_some() {
                prompter.say(&format!("Task {} updated.", index + 1));
            }
        }
        LoopCommand::DeleteTask(index) => {
            if let Some(removed) = report(prompter, session.delete_task(index))? {
                prompter.say(&format!("Deleted task {}: {}", index + 1, removed.description));
            }
        }
        LoopCommand::Rollback => return rollback(session, prompter, now),
        LoopCommand::RetryPhase => {
            if report(prompter, session.retry_current_phase(now))?.is_some() {
                prompter.say("Tasks for this phase were cleared and will be generated again.");
                return Ok(Handled::PhaseChanged);
            }
        }
        LoopCommand::UndoVerify => {
            if report(prompter, session.undo_last_verification(now))?.is_some() {
                prompter.say(&format!(
                    "Returned to phase {}.",
                    session.state().current_phase + 1
                ));
                return Ok(Handled::PhaseChanged);
            }
        }
        LoopCommand::History => {
            let lines = render_history(&session.state().phase_history);
            if lines.is_empty() {
                prompter.say("No history yet.");
            }
            for line in lines {
                prompter.say(&line);
            }
        }
        LoopCommand::NextPhase => return verify(session, collab, prompter, label, now),
    }
    Ok(Handled::Stay)
}

fn rollback(
    session: &mut PhaseSession,
    prompter: &mut dyn Prompter,
    now: DateTime<Utc>,
) -> Result<Handled> {
    let choices = rollback_choices(session.state());
    if choices.is_empty() {
        prompter.say("No earlier phase to roll back to.");
        return Ok(Handled::Stay);
    }
    prompter.say("Earlier phases:");
    for (index, line) in &choices {
        prompter.say(&format!("  {}. {line}", index + 1));
    }
    let Some(answer) = prompter.ask("Roll back to phase number:")? else {
        return Ok(Handled::Interrupted);
    };
    let Some(target) = answer.parse::<usize>().ok().and_then(|n| n.checked_sub(1)) else {
        prompter.say(&format!("'{answer}' is not a phase number."));
        return Ok(Handled::Stay);
    };
    if report(prompter, session.rollback_to(target, now))?.is_some() {
        prompter.say(&format!("Rolled back to phase {}.", target + 1));
        return Ok(Handled::PhaseChanged);
    }
    Ok(Handled::Stay)
}

fn verify(
    session: &mut PhaseSession,
    collab: &Collaborators<'_>,
    prompter: &mut dyn Prompter,
    label: &PhaseLabel,
    now: DateTime<Utc>,
) -> Result<Handled> {
    if let Err(err) = session.request_verification() {
        prompter.say(&err.to_string());
        return Ok(Handled::Stay);
    }
    let mut verifier = Verifier::new(collab.host, collab.config.verification_diff_limit_bytes);
    if let Some(judge) = collab.judge {
        verifier = verifier.with_judge(judge);
    }
    prompter.say("Checking the latest commit...");
    let outcome = verifier.verify(&session.state().repo_url, label.number);

    match report(prompter, session.record_verification(&outcome, now))? {
        None => Ok(Handled::Stay),
        Some(Some(record)) => {
            prompter.say("Phase verified.");
            prompter.say(&outcome.message);
            let mut summary = format!(
                "Completed {}/{} tasks",
                record.tasks_completed, record.total_tasks
            );
            if !record.time_spent.is_empty() {
                summary.push_str(&format!(" in {}", record.time_spent));
            }
            prompter.say(&format!("{summary}."));
            Ok(Handled::PhaseChanged)
        }
        Some(None) => {
            prompter.say("Phase not verified.");
            prompter.say(&outcome.message);
            prompter.say("Fix the commit message, push again, then type 'next-phase'.");
            Ok(Handled::Stay)
        }
    }
}

fn finish(
    session: &mut PhaseSession,
    collab: &Collaborators<'_>,
    prompter: &mut dyn Prompter,
) -> Result<RunOutcome> {
    let state = session.state();
    prompter.say("");
    prompter.say("All phases completed.");
    prompter.say(&format!(
        "{} of {} phases verified for '{}'.",
        session.machine().completed_phase_count(),
        state.phases.len(),
        state.project
    ));
    for line in render_history(&state.phase_history) {
        prompter.say(&format!("  {line}"));
    }
    let archived = session.archive_if_completed((collab.clock)())?;
    if let Some(path) = &archived {
        prompter.say(&format!("Session archived to {}", path.display()));
    }
    Ok(RunOutcome::Completed { archived })
}

fn print_tasks(session: &PhaseSession, prompter: &mut dyn Prompter) {
    let tasks = session.machine().current_tasks();
    if tasks.is_empty() {
        prompter.say("No tasks for this phase.");
        return;
    }
    prompter.say("Tasks:");
    for (i, task) in tasks.iter().enumerate() {
        let mark = if task.completed { "x" } else { " " };
        prompter.say(&format!("  {}. [{mark}] {}", i + 1, task.description));
    }
    print_progress(session, prompter);
}

fn print_progress(session: &PhaseSession, prompter: &mut dyn Prompter) {
    let stats = session.machine().current_stats();
    prompter.say(&format!(
        "Progress: {}/{} tasks ({:.0}%)",
        stats.completed, stats.total, stats.percentage
    ));
}

/// Report validation errors to the operator; anything else propagates.
fn report<T>(prompter: &mut dyn Prompter, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.downcast_ref::<TransitionError>().is_some() => {
            prompter.say(&err.to_string());
            Ok(None)
        }
        Err(err) => Err(err),
    }
}
