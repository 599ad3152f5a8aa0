//! Execution state machine for the phase workflow.
//!
//! The machine owns the [`SessionState`] and validates every transition before
//! mutating it, so a rejected operation leaves the session exactly as it was.
//! Persisting after a transition is the job of `session::PhaseSession`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::history;
use crate::core::ledger::{self, LedgerError};
use crate::core::phase_label::{PhaseLabel, parse_phase_label};
use crate::core::types::{
    CompletionRecord, HistoryEntry, PhaseAction, ProjectBrief, SessionState, SessionStatus, Task,
    TaskStats, VerifyOutcome,
};

/// Progress within the current phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseStage {
    TasksPending,
    TasksInProgress,
    AwaitingVerification,
    Verified,
    /// Verification failed; still awaiting a passing verification.
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineState {
    Setup,
    Planning,
    AwaitingApproval,
    InProgress(PhaseStage),
    Completed,
}

impl MachineState {
    pub fn name(&self) -> &'static str {
        match self {
            MachineState::Setup => "setup",
            MachineState::Planning => "planning",
            MachineState::AwaitingApproval => "awaiting_approval",
            MachineState::InProgress(PhaseStage::TasksPending) => "tasks_pending",
            MachineState::InProgress(PhaseStage::TasksInProgress) => "tasks_in_progress",
            MachineState::InProgress(PhaseStage::AwaitingVerification) => "awaiting_verification",
            MachineState::InProgress(PhaseStage::Verified) => "verified",
            MachineState::InProgress(PhaseStage::Rejected { .. }) => "rejected",
            MachineState::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    #[error("plan has no phases")]
    EmptyPlan,
    #[error("repository URL must not be empty")]
    EmptyRepoUrl,
    #[error("repository URL is already set")]
    AlreadySet,
    #[error(
        "cannot roll back to phase {} from phase {}; choose an earlier phase",
        .target + 1,
        .current + 1
    )]
    InvalidTarget { target: usize, current: usize },
    #[error("nothing to undo: no phase has been verified")]
    NoOp,
    #[error("phase {} reached its limit of {attempts} verification attempts", .phase + 1)]
    VerificationLimitReached { phase: usize, attempts: u32 },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Owns the session and enforces the phase lifecycle.
#[derive(Debug, Clone)]
pub struct ExecutionMachine {
    session: SessionState,
    state: MachineState,
    proposal: Vec<String>,
    attempts: BTreeMap<usize, u32>,
    max_attempts: Option<u32>,
}

impl Default for ExecutionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionMachine {
    pub fn new() -> Self {
        Self::from_session(SessionState::default())
    }

    /// Rebuild the machine from a persisted session.
    pub fn from_session(session: SessionState) -> Self {
        let state = match session.status {
            SessionStatus::Setup if session.project.is_empty() => MachineState::Setup,
            SessionStatus::Setup => MachineState::Planning,
            SessionStatus::Completed => MachineState::Completed,
            SessionStatus::InProgress if session.is_complete() => MachineState::Completed,
            SessionStatus::InProgress => MachineState::InProgress(derive_stage(&session)),
        };
        Self {
            session,
            state,
            proposal: Vec::new(),
            attempts: BTreeMap::new(),
            max_attempts: None,
        }
    }

    /// Cap verification attempts per phase. `None` means unbounded.
    pub fn with_verification_limit(mut self, limit: Option<u32>) -> Self {
        self.max_attempts = limit;
        self
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn into_session(self) -> SessionState {
        self.session
    }

    pub fn state(&self) -> &MachineState {
        &self.state
    }

    /// Phases proposed but not yet approved.
    pub fn proposal(&self) -> &[String] {
        &self.proposal
    }

    pub fn configure(&mut self, brief: ProjectBrief) -> Result<(), TransitionError> {
        self.require("configure the project", |s| matches!(s, MachineState::Setup))?;
        self.session.configure(brief);
        self.state = MachineState::Planning;
        Ok(())
    }

    pub fn propose_plan(&mut self, phases: Vec<String>) -> Result<(), TransitionError> {
        self.require("propose a plan", is_planning)?;
        if phases.is_empty() {
            return Err(TransitionError::EmptyPlan);
        }
        self.proposal = phases;
        self.state = MachineState::AwaitingApproval;
        Ok(())
    }

    pub fn approve_plan(&mut self, phases: Vec<String>) -> Result<(), TransitionError> {
        self.require("approve a plan", is_planning)?;
        if phases.is_empty() {
            return Err(TransitionError::EmptyPlan);
        }
        self.proposal.clear();
        self.session.phases = phases;
        self.session.current_phase = 0;
        self.session.status = SessionStatus::InProgress;
        self.state = MachineState::InProgress(PhaseStage::TasksPending);
        Ok(())
    }

    pub fn set_repo_url(&mut self, url: &str) -> Result<(), TransitionError> {
        if !self.session.repo_url.is_empty() {
            return Err(TransitionError::AlreadySet);
        }
        let url = url.trim();
        if url.is_empty() {
            return Err(TransitionError::EmptyRepoUrl);
        }
        self.session.repo_url = url.to_string();
        Ok(())
    }

    /// Enter the current phase: create its tasks unless present and start its
    /// timer. Returns whether tasks were created.
    pub fn begin_phase<S: AsRef<str>>(
        &mut self,
        descriptions: &[S],
        now: DateTime<Utc>,
    ) -> Result<bool, TransitionError> {
        self.require("begin a phase", is_in_progress)?;
        let phase = self.session.current_phase;
        let created = ledger::ensure_tasks(&mut self.session, phase, descriptions);
        ledger::start_phase_timer(&mut self.session, phase, now);
        self.refresh_stage();
        Ok(created)
    }

    pub fn mark_complete(
        &mut self,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.require("mark a task", is_editable)?;
        let phase = self.session.current_phase;
        ledger::mark_complete(&mut self.session, phase, index, now)?;
        self.refresh_stage();
        Ok(())
    }

    pub fn mark_incomplete(&mut self, index: usize) -> Result<(), TransitionError> {
        self.require("unmark a task", is_editable)?;
        let phase = self.session.current_phase;
        ledger::mark_incomplete(&mut self.session, phase, index)?;
        self.refresh_stage();
        Ok(())
    }

    pub fn add_task(&mut self, description: &str) -> Result<usize, TransitionError> {
        self.require("add a task", is_editable)?;
        let phase = self.session.current_phase;
        let index = ledger::add_task(&mut self.session, phase, description)?;
        self.refresh_stage();
        Ok(index)
    }

    pub fn edit_task(&mut self, index: usize, description: &str) -> Result<(), TransitionError> {
        self.require("edit a task", is_editable)?;
        let phase = self.session.current_phase;
        ledger::edit_task(&mut self.session, phase, index, description)?;
        Ok(())
    }

    pub fn delete_task(&mut self, index: usize) -> Result<Task, TransitionError> {
        self.require("delete a task", is_editable)?;
        let phase = self.session.current_phase;
        let removed = ledger::delete_task(&mut self.session, phase, index)?;
        self.refresh_stage();
        Ok(removed)
    }

    /// Operator asked to move on; the next step is an external verification.
    pub fn request_verification(&mut self) -> Result<(), TransitionError> {
        self.require("request verification", is_editable)?;
        self.check_attempt_limit()?;
        self.state = MachineState::InProgress(PhaseStage::AwaitingVerification);
        Ok(())
    }

    /// Apply a verification result.
    ///
    /// A pass finalizes the phase timer, appends the completion entry and
    /// advances; the returned record describes the completed phase. A failure
    /// moves to `Rejected` and returns `None`.
    pub fn record_verification(
        &mut self,
        outcome: &VerifyOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<CompletionRecord>, TransitionError> {
        self.require("record a verification", |s| {
            matches!(
                s,
                MachineState::InProgress(
                    PhaseStage::AwaitingVerification | PhaseStage::Rejected { .. }
                )
            )
        })?;
        self.check_attempt_limit()?;
        let phase = self.session.current_phase;
        *self.attempts.entry(phase).or_insert(0) += 1;

        if !outcome.matched {
            self.state = MachineState::InProgress(PhaseStage::Rejected {
                reason: outcome.message.clone(),
            });
            return Ok(None);
        }

        let time_spent =
            ledger::complete_phase_timer(&mut self.session, phase, now).unwrap_or_default();
        let phase_name = self
            .current_label()
            .map(|label| label.name)
            .unwrap_or_default();
        history::record_completion(
            &mut self.session,
            phase,
            &phase_name,
            outcome.commit_sha.as_deref().unwrap_or_default(),
            &time_spent,
            now,
        );
        let record = self
            .session
            .phase_history
            .last()
            .and_then(HistoryEntry::as_completion)
            .cloned();
        self.state = MachineState::InProgress(PhaseStage::Verified);
        self.advance_phase()?;
        Ok(record)
    }

    pub fn advance_phase(&mut self) -> Result<(), TransitionError> {
        self.require("advance the phase", |s| {
            matches!(s, MachineState::InProgress(PhaseStage::Verified))
        })?;
        self.session.current_phase += 1;
        if self.session.current_phase >= self.session.phases.len() {
            self.session.current_phase = self.session.phases.len();
            self.session.status = SessionStatus::Completed;
            self.state = MachineState::Completed;
        } else {
            self.refresh_stage();
        }
        Ok(())
    }

    /// Return to an earlier phase, discarding the task and timing data of
    /// every phase after `target` up to the current one.
    pub fn rollback_to(
        &mut self,
        target: usize,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.require("roll back", is_navigable)?;
        let current = self.session.current_phase;
        if target >= current {
            return Err(TransitionError::InvalidTarget { target, current });
        }
        for phase in target + 1..=current {
            self.session.phase_tasks.remove(&phase);
            self.session.phase_time_tracking.remove(&phase);
        }
        self.session.current_phase = target;
        self.session.status = SessionStatus::InProgress;
        history::record_action(
            &mut self.session,
            PhaseAction::Rollback {
                rolled_back_to: target,
                timestamp: now,
            },
        );
        self.refresh_stage();
        Ok(())
    }

    /// Discard the current phase's tasks and timing so they are regenerated.
    pub fn retry_current_phase(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require("retry the phase", is_in_progress)?;
        let phase = self.session.current_phase;
        self.session.phase_tasks.remove(&phase);
        self.session.phase_time_tracking.remove(&phase);
        self.attempts.remove(&phase);
        history::record_action(
            &mut self.session,
            PhaseAction::Retry {
                phase,
                timestamp: now,
            },
        );
        self.refresh_stage();
        Ok(())
    }

    /// Step back one phase. Task data of the restored phase is kept as is.
    pub fn undo_last_verification(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require("undo a verification", is_navigable)?;
        let from = self.session.current_phase;
        if from == 0 {
            return Err(TransitionError::NoOp);
        }
        let to = from - 1;
        self.session.current_phase = to;
        self.session.status = SessionStatus::InProgress;
        history::record_action(
            &mut self.session,
            PhaseAction::Undo {
                from_phase: from,
                to_phase: to,
                timestamp: now,
            },
        );
        self.refresh_stage();
        Ok(())
    }

    pub fn completed_phase_count(&self) -> usize {
        history::completed_phase_count(&self.session.phase_history)
    }

    /// Label of the current phase, `None` once all phases are done.
    ///
    /// The name comes from the plan line; the number is always the phase
    /// position, whatever number the line itself carries.
    pub fn current_label(&self) -> Option<PhaseLabel> {
        let phase = self.session.current_phase;
        let line = self.session.phases.get(phase)?;
        let name = parse_phase_label(line, phase)
            .map_or_else(|_| format!("Phase {}", phase + 1), |label| label.name);
        Some(PhaseLabel {
            number: phase + 1,
            name,
        })
    }

    pub fn current_tasks(&self) -> &[Task] {
        ledger::tasks(&self.session, self.session.current_phase)
    }

    pub fn current_stats(&self) -> TaskStats {
        ledger::stats(&self.session, self.session.current_phase)
    }

    pub fn verification_attempts(&self) -> u32 {
        self.attempts
            .get(&self.session.current_phase)
            .copied()
            .unwrap_or(0)
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: impl Fn(&MachineState) -> bool,
    ) -> Result<(), TransitionError> {
        if allowed(&self.state) {
            Ok(())
        } else {
            Err(TransitionError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }

    fn check_attempt_limit(&self) -> Result<(), TransitionError> {
        match self.max_attempts {
            Some(limit) if self.verification_attempts() >= limit => {
                Err(TransitionError::VerificationLimitReached {
                    phase: self.session.current_phase,
                    attempts: limit,
                })
            }
            _ => Ok(()),
        }
    }

    fn refresh_stage(&mut self) {
        self.state = MachineState::InProgress(derive_stage(&self.session));
    }
}

fn derive_stage(session: &SessionState) -> PhaseStage {
    let stats = ledger::stats(session, session.current_phase);
    if stats.completed == 0 {
        PhaseStage::TasksPending
    } else if stats.completed == stats.total {
        PhaseStage::AwaitingVerification
    } else {
        PhaseStage::TasksInProgress
    }
}

fn is_planning(state: &MachineState) -> bool {
    matches!(state, MachineState::Planning | MachineState::AwaitingApproval)
}

fn is_in_progress(state: &MachineState) -> bool {
    matches!(state, MachineState::InProgress(_))
}

fn is_editable(state: &MachineState) -> bool {
    matches!(state, MachineState::InProgress(stage) if *stage != PhaseStage::Verified)
}

fn is_navigable(state: &MachineState) -> bool {
    matches!(state, MachineState::InProgress(_) | MachineState::Completed)
}
