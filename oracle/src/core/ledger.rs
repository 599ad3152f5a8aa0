//! Per-phase task ledger and phase timers.
//!
//! All functions mutate an in-memory [`SessionState`]; persisting the result is
//! the caller's job (see `session::PhaseSession`).

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::core::types::{PhaseTiming, SessionState, Task, TaskStats};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("task {} not found in phase {} ({len} tasks)", .index + 1, .phase + 1)]
    TaskNotFound {
        phase: usize,
        index: usize,
        len: usize,
    },
    #[error("task description must not be empty")]
    EmptyDescription,
}

/// Create tasks for `phase` unless it already has an entry.
///
/// Returns `true` if tasks were created. Existing entries are never replaced,
/// so re-entering a phase after an interruption keeps its progress.
pub fn ensure_tasks<S: AsRef<str>>(
    state: &mut SessionState,
    phase: usize,
    descriptions: &[S],
) -> bool {
    if state.phase_tasks.contains_key(&phase) {
        return false;
    }
    let tasks = descriptions
        .iter()
        .map(|d| Task::new(d.as_ref().trim()))
        .collect();
    state.phase_tasks.insert(phase, tasks);
    true
}

/// Tasks of `phase` (empty if none were generated yet).
pub fn tasks(state: &SessionState, phase: usize) -> &[Task] {
    state
        .phase_tasks
        .get(&phase)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn has_tasks(state: &SessionState, phase: usize) -> bool {
    state.phase_tasks.contains_key(&phase)
}

pub fn mark_complete(
    state: &mut SessionState,
    phase: usize,
    index: usize,
    now: DateTime<Utc>,
) -> Result<(), LedgerError> {
    let task = task_mut(state, phase, index)?;
    task.completed = true;
    if task.started_at.is_none() {
        task.started_at = Some(now);
    }
    Ok(())
}

/// Clear the completion flag. `started_at` is kept: work began regardless.
pub fn mark_incomplete(
    state: &mut SessionState,
    phase: usize,
    index: usize,
) -> Result<(), LedgerError> {
    task_mut(state, phase, index)?.completed = false;
    Ok(())
}

pub fn add_task(
    state: &mut SessionState,
    phase: usize,
    description: &str,
) -> Result<usize, LedgerError> {
    let description = non_empty(description)?;
    let tasks = state.phase_tasks.entry(phase).or_default();
    tasks.push(Task::new(description));
    Ok(tasks.len() - 1)
}

pub fn edit_task(
    state: &mut SessionState,
    phase: usize,
    index: usize,
    description: &str,
) -> Result<(), LedgerError> {
    let description = non_empty(description)?;
    task_mut(state, phase, index)?.description = description.to_string();
    Ok(())
}

pub fn delete_task(
    state: &mut SessionState,
    phase: usize,
    index: usize,
) -> Result<Task, LedgerError> {
    let len = tasks(state, phase).len();
    match state.phase_tasks.get_mut(&phase) {
        Some(tasks) if index < tasks.len() => Ok(tasks.remove(index)),
        _ => Err(LedgerError::TaskNotFound { phase, index, len }),
    }
}

pub fn stats(state: &SessionState, phase: usize) -> TaskStats {
    let tasks = tasks(state, phase);
    let total = tasks.len();
    let completed = tasks.iter().filter(|t| t.completed).count();
    let percentage = if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64 * 100.0
    };
    TaskStats {
        completed,
        total,
        percentage,
    }
}

/// Start the phase timer unless it is already running or finished.
pub fn start_phase_timer(state: &mut SessionState, phase: usize, now: DateTime<Utc>) -> bool {
    if state.phase_time_tracking.contains_key(&phase) {
        return false;
    }
    state.phase_time_tracking.insert(
        phase,
        PhaseTiming {
            started_at: now,
            completed_at: None,
        },
    );
    true
}

/// Stamp `completed_at` and return the human-readable time spent.
///
/// Returns `None` when the phase timer was never started.
pub fn complete_phase_timer(
    state: &mut SessionState,
    phase: usize,
    now: DateTime<Utc>,
) -> Option<String> {
    let timing = state.phase_time_tracking.get_mut(&phase)?;
    timing.completed_at = Some(now);
    Some(format_time_spent(now - timing.started_at))
}

/// `{h}h {m}m` when at least an hour has passed, `{m}m` otherwise.
pub fn format_time_spent(duration: Duration) -> String {
    let total_minutes = duration.num_minutes().max(0);
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

fn task_mut(
    state: &mut SessionState,
    phase: usize,
    index: usize,
) -> Result<&mut Task, LedgerError> {
    let len = tasks(state, phase).len();
    state
        .phase_tasks
        .get_mut(&phase)
        .and_then(|tasks| tasks.get_mut(index))
        .ok_or(LedgerError::TaskNotFound { phase, index, len })
}

fn non_empty(description: &str) -> Result<&str, LedgerError> {
    let trimmed = description.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::EmptyDescription);
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, minute, 0).unwrap()
    }

    fn state_with_tasks(descriptions: &[&str]) -> SessionState {
        let mut state = SessionState::default();
        ensure_tasks(&mut state, 0, descriptions);
        state
    }

    #[test]
    fn unmark_keeps_description_and_started_at() {
        let mut state = state_with_tasks(&["write schema", "add endpoint"]);

        mark_complete(&mut state, 0, 1, at(5)).expect("mark");
        mark_incomplete(&mut state, 0, 1).expect("unmark");

        let task = &tasks(&state, 0)[1];
        assert_eq!(task.description, "add endpoint");
        assert!(!task.completed);
        assert_eq!(task.started_at, Some(at(5)));
    }

    #[test]
    fn started_at_is_set_only_once() {
        let mut state = state_with_tasks(&["a"]);
        mark_complete(&mut state, 0, 0, at(1)).expect("mark");
        mark_incomplete(&mut state, 0, 0).expect("unmark");
        mark_complete(&mut state, 0, 0, at(9)).expect("mark again");
        assert_eq!(tasks(&state, 0)[0].started_at, Some(at(1)));
    }

    #[test]
    fn ensure_tasks_twice_preserves_progress() {
        let mut state = state_with_tasks(&["a", "b"]);
        mark_complete(&mut state, 0, 0, at(0)).expect("mark");

        let created = ensure_tasks(&mut state, 0, &["x", "y", "z"]);

        assert!(!created);
        let current = tasks(&state, 0);
        assert_eq!(current.len(), 2);
        assert!(current[0].completed);
        assert_eq!(current[0].description, "a");
    }

    #[test]
    fn out_of_range_indices_report_not_found() {
        let mut state = state_with_tasks(&["a"]);
        assert_eq!(
            mark_complete(&mut state, 0, 1, at(0)),
            Err(LedgerError::TaskNotFound {
                phase: 0,
                index: 1,
                len: 1
            })
        );
        assert!(mark_incomplete(&mut state, 4, 0).is_err());
        assert!(edit_task(&mut state, 0, 7, "new").is_err());
        assert!(delete_task(&mut state, 0, 1).is_err());
        assert_eq!(tasks(&state, 0).len(), 1);
    }

    #[test]
    fn add_edit_delete_round() {
        let mut state = SessionState::default();
        let idx = add_task(&mut state, 2, "  first ").expect("add");
        assert_eq!(idx, 0);
        add_task(&mut state, 2, "second").expect("add");
        edit_task(&mut state, 2, 0, "renamed").expect("edit");
        let removed = delete_task(&mut state, 2, 1).expect("delete");

        assert_eq!(removed.description, "second");
        assert_eq!(tasks(&state, 2), &[Task::new("renamed")]);
    }

    #[test]
    fn empty_descriptions_are_rejected() {
        let mut state = state_with_tasks(&["a"]);
        assert_eq!(
            add_task(&mut state, 0, "   "),
            Err(LedgerError::EmptyDescription)
        );
        assert_eq!(
            edit_task(&mut state, 0, 0, ""),
            Err(LedgerError::EmptyDescription)
        );
    }

    #[test]
    fn stats_on_empty_phase_is_zero_percent() {
        let state = SessionState::default();
        let s = stats(&state, 3);
        assert_eq!(s.total, 0);
        assert_eq!(s.completed, 0);
        assert_eq!(s.percentage, 0.0);
    }

    #[test]
    fn stats_counts_completed_tasks() {
        let mut state = state_with_tasks(&["a", "b", "c", "d"]);
        mark_complete(&mut state, 0, 0, at(0)).expect("mark");
        let s = stats(&state, 0);
        assert_eq!((s.completed, s.total), (1, 4));
        assert_eq!(s.percentage, 25.0);
    }

    #[test]
    fn timer_reports_minutes_and_hours() {
        let mut state = SessionState::default();
        assert!(start_phase_timer(&mut state, 0, at(0)));
        assert!(!start_phase_timer(&mut state, 0, at(30)));
        assert_eq!(
            complete_phase_timer(&mut state, 0, at(42)),
            Some("42m".to_string())
        );
        assert_eq!(complete_phase_timer(&mut state, 1, at(42)), None);
    }

    #[test]
    fn format_time_spent_variants() {
        assert_eq!(format_time_spent(Duration::minutes(83)), "1h 23m");
        assert_eq!(format_time_spent(Duration::seconds(59)), "0m");
        assert_eq!(format_time_spent(Duration::minutes(120)), "2h 0m");
        assert_eq!(format_time_spent(Duration::minutes(-5)), "0m");
    }
}
