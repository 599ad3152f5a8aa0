//! Phase session: the execution machine bound to the state store.
//!
//! Every externally observable transition is written to disk before the call
//! returns, so an interrupted session resumes exactly where it stopped.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::core::machine::{ExecutionMachine, TransitionError};
use crate::core::types::{CompletionRecord, ProjectBrief, SessionState, Task, VerifyOutcome};
use crate::io::state_store::{LoadOutcome, StateStore};

/// What was found on disk when opening a session.
#[derive(Debug)]
pub enum Opened {
    Fresh(PhaseSession),
    /// A usable saved session; the caller decides whether to resume it.
    Saved(SessionState),
    /// The saved file was unusable; a fresh session was started instead.
    Recovered { session: PhaseSession, reason: String },
}

#[derive(Debug)]
pub struct PhaseSession {
    machine: ExecutionMachine,
    store: StateStore,
}

impl PhaseSession {
    /// Look for a saved session in `store`.
    pub fn open(store: StateStore, verification_limit: Option<u32>) -> Opened {
        match store.load() {
            LoadOutcome::Loaded(state) => Opened::Saved(state),
            LoadOutcome::Missing => Opened::Fresh(Self::start(store, verification_limit)),
            LoadOutcome::Corrupt(reason) => Opened::Recovered {
                session: Self::start(store, verification_limit),
                reason,
            },
        }
    }

    pub fn start(store: StateStore, verification_limit: Option<u32>) -> Self {
        Self {
            machine: ExecutionMachine::new().with_verification_limit(verification_limit),
            store,
        }
    }

    pub fn resume(store: StateStore, state: SessionState, verification_limit: Option<u32>) -> Self {
        info!(
            project = %state.project,
            current_phase = state.current_phase,
            "resuming session"
        );
        Self {
            machine: ExecutionMachine::from_session(state)
                .with_verification_limit(verification_limit),
            store,
        }
    }

    /// Archive the saved session `previous` and start over.
    pub fn start_over(
        store: StateStore,
        previous: &SessionState,
        verification_limit: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<(Self, Option<PathBuf>)> {
        let archived = store.archive(previous, now)?;
        store.clear()?;
        Ok((Self::start(store, verification_limit), archived))
    }

    pub fn machine(&self) -> &ExecutionMachine {
        &self.machine
    }

    pub fn state(&self) -> &SessionState {
        self.machine.session()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn configure(&mut self, brief: ProjectBrief) -> Result<()> {
        self.machine.configure(brief)?;
        self.save()
    }

    /// Record a proposal awaiting approval. Proposals are not persisted.
    pub fn propose_plan(&mut self, phases: Vec<String>) -> Result<(), TransitionError> {
        self.machine.propose_plan(phases)
    }

    pub fn approve_plan(&mut self, phases: Vec<String>) -> Result<()> {
        self.machine.approve_plan(phases)?;
        self.save()
    }

    pub fn set_repo_url(&mut self, url: &str) -> Result<()> {
        self.machine.set_repo_url(url)?;
        self.save()
    }

    pub fn begin_phase<S: AsRef<str>>(
        &mut self,
        descriptions: &[S],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let created = self.machine.begin_phase(descriptions, now)?;
        self.save()?;
        Ok(created)
    }

    pub fn mark_complete(&mut self, index: usize, now: DateTime<Utc>) -> Result<()> {
        self.machine.mark_complete(index, now)?;
        self.save()
    }

    pub fn mark_incomplete(&mut self, index: usize) -> Result<()> {
        self.machine.mark_incomplete(index)?;
        self.save()
    }

    pub fn add_task(&mut self, description: &str) -> Result<usize> {
        let index = self.machine.add_task(description)?;
        self.save()?;
        Ok(index)
    }

    pub fn edit_task(&mut self, index: usize, description: &str) -> Result<()> {
        self.machine.edit_task(index, description)?;
        self.save()
    }

    pub fn delete_task(&mut self, index: usize) -> Result<Task> {
        let removed = self.machine.delete_task(index)?;
        self.save()?;
        Ok(removed)
    }

    pub fn request_verification(&mut self) -> Result<(), TransitionError> {
        self.machine.request_verification()
    }

    /// Apply a verification result; only a pass changes persisted state.
    #[instrument(skip_all, fields(matched = outcome.matched))]
    pub fn record_verification(
        &mut self,
        outcome: &VerifyOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<CompletionRecord>> {
        let record = self.machine.record_verification(outcome, now)?;
        if record.is_some() {
            self.save()?;
        }
        Ok(record)
    }

    pub fn rollback_to(&mut self, target: usize, now: DateTime<Utc>) -> Result<()> {
        self.machine.rollback_to(target, now)?;
        self.save()
    }

    pub fn retry_current_phase(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.machine.retry_current_phase(now)?;
        self.save()
    }

    pub fn undo_last_verification(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.machine.undo_last_verification(now)?;
        self.save()
    }

    /// Move a finished session into the archive.
    pub fn archive_if_completed(&self, now: DateTime<Utc>) -> Result<Option<PathBuf>> {
        if !self.state().is_complete() {
            debug!("session not complete, keeping it in place");
            return Ok(None);
        }
        self.store.archive(self.state(), now)
    }

    fn save(&self) -> Result<()> {
        self.store.save(self.machine.session())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SessionStatus;
    use crate::test_support::{at, brief};

    fn store() -> (tempfile::TempDir, StateStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join(".oracle_data"));
        (temp, store)
    }

    #[test]
    fn transitions_are_persisted() {
        let (_temp, store) = store();
        let mut session = PhaseSession::start(store.clone(), None);
        session.configure(brief()).expect("configure");
        session
            .approve_plan(vec!["Phase 1: Setup".into(), "Phase 2: API".into()])
            .expect("approve");
        session.begin_phase(&["a", "b"], at(0)).expect("begin");
        session.mark_complete(1, at(1)).expect("mark");

        let saved = store.load_or_none().expect("saved");
        assert_eq!(saved.status, SessionStatus::InProgress);
        assert_eq!(saved.phases.len(), 2);
        assert!(saved.phase_tasks[&0][1].completed);
        assert_eq!(saved.phase_tasks[&0][1].started_at, Some(at(1)));
    }

    #[test]
    fn rejected_transition_does_not_write() {
        let (_temp, store) = store();
        let mut session = PhaseSession::start(store.clone(), None);
        let err = session.approve_plan(Vec::new()).unwrap_err();
        assert!(err.downcast_ref::<TransitionError>().is_some());
        assert!(!store.exists());
    }

    #[test]
    fn open_reports_saved_and_corrupt_sessions() {
        let (_temp, store) = store();
        assert!(matches!(PhaseSession::open(store.clone(), None), Opened::Fresh(_)));

        let mut session = PhaseSession::start(store.clone(), None);
        session.configure(brief()).expect("configure");
        assert!(matches!(
            PhaseSession::open(store.clone(), None),
            Opened::Saved(state) if state.project == "Todo"
        ));

        std::fs::write(store.session_path(), "{not json").expect("write");
        assert!(matches!(
            PhaseSession::open(store, None),
            Opened::Recovered { .. }
        ));
    }

    #[test]
    fn start_over_archives_previous_session() {
        let (_temp, store) = store();
        let mut session = PhaseSession::start(store.clone(), None);
        session.configure(brief()).expect("configure");
        let previous = session.state().clone();

        let (fresh, archived) =
            PhaseSession::start_over(store.clone(), &previous, None, at(5)).expect("start over");
        let archived = archived.expect("archived");
        assert!(archived.is_file());
        assert!(!store.exists());
        assert!(fresh.state().project.is_empty());
    }
}
