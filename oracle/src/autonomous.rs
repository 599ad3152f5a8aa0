//! Autonomous generation flow.
//!
//! Plans a project from a one-line idea, clones the target repository into a
//! sandboxed workspace, generates each planned file behind an operator review
//! and finally commits and pushes the work branch. Progress is kept in a
//! [`SessionSnapshot`] so an interrupted run resumes at the next file.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::agents::autonomous_planner::AutonomousPlanner;
use crate::agents::coder::Coder;
use crate::core::branch::work_branch;
use crate::core::types::{AutonomousPlan, Complexity};
use crate::io::config::OracleConfig;
use crate::io::console::{Prompter, ask_required, confirm};
use crate::io::github::{IssueTracker, NewIssue, parse_repo_url};
use crate::io::llm::Completion;
use crate::io::sandbox::Sandbox;
use crate::io::snapshot::{SessionSnapshot, SnapshotLoad, SnapshotStatus, SnapshotStore};

const ISSUE_LABEL: &str = "oracle";

pub struct AutoCollaborators<'a> {
    pub llm: &'a dyn Completion,
    pub issues: &'a dyn IssueTracker,
    pub config: &'a OracleConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoOutcome {
    Pushed { branch: String },
    Declined,
    /// Input ended; the snapshot keeps the progress.
    Interrupted,
}

/// Either a value to continue with or an early stop.
enum Next<T> {
    Go(T),
    Stop(AutoOutcome),
}

enum Review {
    Approve,
    Rewrite,
    Cancel,
}

#[instrument(skip_all)]
pub fn run_autonomous(
    sandbox: &mut Sandbox,
    snapshots: &SnapshotStore,
    collab: &AutoCollaborators<'_>,
    prompter: &mut dyn Prompter,
) -> Result<AutoOutcome> {
    let resumed = match resume_snapshot(sandbox, snapshots, prompter)? {
        Next::Go(resumed) => resumed,
        Next::Stop(outcome) => return Ok(outcome),
    };
    let mut snapshot = match resumed {
        Some(snapshot) => {
            prompter.say("Resuming previous session...");
            sandbox.set_workspace(&snapshot.workspace_path.to_string_lossy())?;
            snapshot
        }
        None => match start_run(sandbox, snapshots, collab, prompter)? {
            Next::Go(snapshot) => snapshot,
            Next::Stop(outcome) => return Ok(outcome),
        },
    };

    if let Some(outcome) = generate_files(sandbox, snapshots, &mut snapshot, collab, prompter)? {
        return Ok(outcome);
    }
    commit_and_push(sandbox, snapshots, &snapshot, prompter)
}

/// `Go(None)` starts a new run.
fn resume_snapshot(
    sandbox: &mut Sandbox,
    snapshots: &SnapshotStore,
    prompter: &mut dyn Prompter,
) -> Result<Next<Option<SessionSnapshot>>> {
    let snapshot = match snapshots.load() {
        SnapshotLoad::Missing => return Ok(Next::Go(None)),
        SnapshotLoad::Corrupt(reason) => {
            prompter.say(&format!(
                "Saved session could not be read ({reason}); starting a new run."
            ));
            snapshots.clear()?;
            return Ok(Next::Go(None));
        }
        SnapshotLoad::Loaded(snapshot) => snapshot,
    };
    match confirm(prompter, "Previous session found. Resume?")? {
        Some(true) => Ok(Next::Go(Some(snapshot))),
        Some(false) => {
            if let Next::Stop(outcome) = discard_workspace(sandbox, &snapshot, prompter)? {
                return Ok(Next::Stop(outcome));
            }
            snapshots.clear()?;
            Ok(Next::Go(None))
        }
        None => Ok(Next::Stop(AutoOutcome::Interrupted)),
    }
}

/// Offer to remove the workspace of an abandoned run.
fn discard_workspace(
    sandbox: &mut Sandbox,
    snapshot: &SessionSnapshot,
    prompter: &mut dyn Prompter,
) -> Result<Next<()>> {
    let path = &snapshot.workspace_path;
    if !path.is_dir() {
        return Ok(Next::Go(()));
    }
    let question = format!("Delete the previous workspace {}?", path.display());
    match confirm(prompter, &question)? {
        Some(true) => {
            sandbox.set_workspace(&path.to_string_lossy())?;
            sandbox.delete_workspace()?;
            Ok(Next::Go(()))
        }
        Some(false) => Ok(Next::Go(())),
        None => Ok(Next::Stop(AutoOutcome::Interrupted)),
    }
}

fn start_run(
    sandbox: &mut Sandbox,
    snapshots: &SnapshotStore,
    collab: &AutoCollaborators<'_>,
    prompter: &mut dyn Prompter,
) -> Result<Next<SessionSnapshot>> {
    let Some(idea) = ask_required(prompter, "What do you want to build?")? else {
        return Ok(Next::Stop(AutoOutcome::Interrupted));
    };
    prompter.say("Planning...");
    let plan = AutonomousPlanner::new(collab.llm)
        .generate_plan(&idea)
        .context("plan generation failed")?;

    prompter.say(&format!("Detected complexity: {}", plan.complexity.as_str()));
    prompter.say("Proposed file structure:");
    for file in &plan.file_structure {
        prompter.say(&format!(" - {file}"));
    }
    match confirm(prompter, "Approve plan?")? {
        Some(true) => {}
        Some(false) => return Ok(Next::Stop(AutoOutcome::Declined)),
        None => return Ok(Next::Stop(AutoOutcome::Interrupted)),
    }

    let Some(repo_url) = ask_required(prompter, "GitHub HTTPS repository URL:")? else {
        return Ok(Next::Stop(AutoOutcome::Interrupted));
    };
    let Some(workspace) = ask_required(prompter, "Local empty workspace path:")? else {
        return Ok(Next::Stop(AutoOutcome::Interrupted));
    };

    let workspace_path = sandbox.set_workspace(&workspace)?.to_path_buf();
    sandbox.clone_repo(&repo_url)?;
    let branch_name = work_branch(&plan.project_name);
    sandbox.create_branch(&branch_name)?;
    info!(branch = %branch_name, workspace = %workspace_path.display(), "workspace ready");

    let snapshot = SessionSnapshot {
        idea,
        complexity: plan.complexity,
        plan,
        repo_url,
        workspace_path,
        branch_name,
        current_file_index: 0,
        status: SnapshotStatus::GeneratingFiles,
    };
    snapshots.save(&snapshot)?;

    if snapshot.complexity != Complexity::Simple {
        create_planning_issues(collab.issues, &snapshot.repo_url, &snapshot.plan, prompter);
    }
    Ok(Next::Go(snapshot))
}

/// One milestone for the project and one issue per phase. Failures are
/// reported and skipped.
pub fn create_planning_issues(
    issues: &dyn IssueTracker,
    repo_url: &str,
    plan: &AutonomousPlan,
    prompter: &mut dyn Prompter,
) {
    let repo = match parse_repo_url(repo_url) {
        Ok(repo) => repo,
        Err(err) => {
            prompter.say(&format!("Skipping issue creation: {err}"));
            return;
        }
    };
    prompter.say("Creating milestone and issues...");
    let milestone = match issues.create_milestone(
        &repo,
        &plan.project_name,
        &format!("Milestone for {}", plan.project_name),
    ) {
        Ok(number) => Some(number),
        Err(err) => {
            warn!(error = %err, "milestone creation failed");
            prompter.say(&format!("Milestone creation failed: {err}"));
            None
        }
    };
    for (i, phase) in plan.phases.iter().enumerate() {
        let outcome = issues.create_issue(
            &repo,
            &NewIssue {
                title: format!("Phase {}: {}", i + 1, phase.phase_name),
                body: phase.description.clone(),
                milestone,
                labels: vec![ISSUE_LABEL.to_string()],
            },
        );
        prompter.say(&outcome.message);
    }
}

/// Generate the remaining files. `Some` when the run stops early.
fn generate_files(
    sandbox: &Sandbox,
    snapshots: &SnapshotStore,
    snapshot: &mut SessionSnapshot,
    collab: &AutoCollaborators<'_>,
    prompter: &mut dyn Prompter,
) -> Result<Option<AutoOutcome>> {
    let coder = Coder::new(collab.llm, collab.config.coder_max_retries);
    let files = snapshot.plan.file_structure.clone();
    for (index, file_path) in files.iter().enumerate().skip(snapshot.current_file_index) {
        loop {
            prompter.say(&format!("Generating code for: {file_path}"));
            let code = coder
                .generate_file_code(&snapshot.idea, file_path)
                .with_context(|| format!("generate {file_path}"))?;
            sandbox.write_file(file_path, &code)?;
            sandbox.stage_all()?;
            for line in sandbox.get_diff()?.lines() {
                prompter.say(line);
            }

            match ask_review(prompter)? {
                None => return Ok(Some(AutoOutcome::Interrupted)),
                Some(Review::Approve) => {
                    snapshot.current_file_index = index + 1;
                    snapshots.save(snapshot)?;
                    break;
                }
                Some(Review::Rewrite) => {}
                Some(Review::Cancel) => {
                    prompter.say("Aborted.");
                    return Ok(Some(AutoOutcome::Declined));
                }
            }
        }
    }
    Ok(None)
}

fn ask_review(prompter: &mut dyn Prompter) -> Result<Option<Review>> {
    let answer = prompter.ask("Approve (a) | Rewrite (r) | Cancel (c):")?;
    Ok(answer.map(|a| match a.to_lowercase().as_str() {
        "a" => Review::Approve,
        "r" => Review::Rewrite,
        _ => Review::Cancel,
    }))
}

fn commit_and_push(
    sandbox: &Sandbox,
    snapshots: &SnapshotStore,
    snapshot: &SessionSnapshot,
    prompter: &mut dyn Prompter,
) -> Result<AutoOutcome> {
    let message = format!("AI: Implementation for {}", snapshot.plan.project_name);
    prompter.say(&format!("Commit message: {message}"));
    match confirm(prompter, "Approve commit?")? {
        Some(true) => {}
        Some(false) => return Ok(AutoOutcome::Declined),
        None => return Ok(AutoOutcome::Interrupted),
    }

    let Some(username) = ask_required(prompter, "GitHub username:")? else {
        return Ok(AutoOutcome::Interrupted);
    };
    let token = loop {
        match prompter.ask_secret("GitHub personal access token (hidden):")? {
            None => return Ok(AutoOutcome::Interrupted),
            Some(token) if token.is_empty() => prompter.say("A token is required."),
            Some(token) => break token,
        }
    };

    sandbox.set_commit_identity(&username)?;
    if !sandbox.commit(&message)? {
        prompter.say("Nothing new to commit; pushing the branch as it is.");
    }
    sandbox.push_with_credential(&username, &token, &snapshot.branch_name)?;
    prompter.say(&format!("Code pushed to branch {}.", snapshot.branch_name));
    snapshots.clear()?;
    Ok(AutoOutcome::Pushed {
        branch: snapshot.branch_name.clone(),
    })
}
