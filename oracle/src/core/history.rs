//! Append-only phase history: completions and navigation actions.

use chrono::{DateTime, Utc};

use crate::core::ledger;
use crate::core::types::{CompletionRecord, HistoryEntry, PhaseAction, SessionState};

/// Append a completion entry for `phase`, snapshotting its task counts.
pub fn record_completion(
    state: &mut SessionState,
    phase: usize,
    phase_name: &str,
    commit_sha: &str,
    time_spent: &str,
    now: DateTime<Utc>,
) {
    let stats = ledger::stats(state, phase);
    state
        .phase_history
        .push(HistoryEntry::Completion(CompletionRecord {
            phase,
            phase_name: phase_name.to_string(),
            completed_at: now,
            commit_sha: commit_sha.to_string(),
            time_spent: time_spent.to_string(),
            tasks_completed: stats.completed,
            total_tasks: stats.total,
        }));
}

pub fn record_action(state: &mut SessionState, action: PhaseAction) {
    state.phase_history.push(HistoryEntry::Action(action));
}

/// Number of true completions in the audit trail.
///
/// Cumulative: rollbacks do not reduce it.
pub fn completed_phase_count(history: &[HistoryEntry]) -> usize {
    history.iter().filter(|e| e.is_completion()).count()
}

/// Phases that can be rolled back to, with their labels.
pub fn rollback_choices(state: &SessionState) -> Vec<(usize, String)> {
    (0..state.current_phase)
        .map(|i| {
            let label = state
                .phases
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("Phase {}", i + 1));
            (i, label)
        })
        .collect()
}

/// One display line per history entry, oldest first.
pub fn render_history(history: &[HistoryEntry]) -> Vec<String> {
    history.iter().map(render_entry).collect()
}

fn render_entry(entry: &HistoryEntry) -> String {
    let stamp = |ts: &DateTime<Utc>| ts.format("%Y-%m-%d %H:%M").to_string();
    match entry {
        HistoryEntry::Completion(record) => {
            let mut line = format!(
                "{} completed phase {} ({}) - {}/{} tasks",
                stamp(&record.completed_at),
                record.phase + 1,
                record.phase_name,
                record.tasks_completed,
                record.total_tasks
            );
            if !record.time_spent.is_empty() {
                line.push_str(&format!(", {}", record.time_spent));
            }
            if !record.commit_sha.is_empty() {
                let short: String = record.commit_sha.chars().take(7).collect();
                line.push_str(&format!(", commit {short}"));
            }
            line
        }
        HistoryEntry::Action(PhaseAction::Rollback {
            rolled_back_to,
            timestamp,
        }) => format!(
            "{} rolled back to phase {}",
            stamp(timestamp),
            rolled_back_to + 1
        ),
        HistoryEntry::Action(PhaseAction::Retry { phase, timestamp }) => {
            format!("{} retried phase {}", stamp(timestamp), phase + 1)
        }
        HistoryEntry::Action(PhaseAction::Undo {
            from_phase,
            to_phase,
            timestamp,
        }) => format!(
            "{} undid verification: phase {} -> phase {}",
            stamp(timestamp),
            from_phase + 1,
            to_phase + 1
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Task;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap()
    }

    #[test]
    fn completion_snapshots_task_counts() {
        let mut state = SessionState::default();
        let mut done = Task::new("a");
        done.completed = true;
        state.phase_tasks.insert(0, vec![done, Task::new("b")]);

        record_completion(&mut state, 0, "Setup", "abc123", "3m", now());

        let record = state.phase_history[0].as_completion().expect("completion");
        assert_eq!(record.tasks_completed, 1);
        assert_eq!(record.total_tasks, 2);
        assert_eq!(record.phase_name, "Setup");
    }

    #[test]
    fn count_ignores_action_entries() {
        let mut state = SessionState::default();
        record_completion(&mut state, 0, "A", "", "", now());
        record_action(
            &mut state,
            PhaseAction::Rollback {
                rolled_back_to: 0,
                timestamp: now(),
            },
        );
        record_completion(&mut state, 0, "A", "", "", now());
        assert_eq!(completed_phase_count(&state.phase_history), 2);
    }

    #[test]
    fn rollback_choices_cover_earlier_phases_only() {
        let state = SessionState {
            phases: vec!["Phase 1: A".into(), "Phase 2: B".into(), "Phase 3: C".into()],
            current_phase: 2,
            ..SessionState::default()
        };
        assert_eq!(
            rollback_choices(&state),
            vec![(0, "Phase 1: A".to_string()), (1, "Phase 2: B".to_string())]
        );
    }

    #[test]
    fn renders_each_entry_kind() {
        let mut state = SessionState::default();
        record_completion(&mut state, 1, "API", "0123456789", "1h 2m", now());
        record_action(
            &mut state,
            PhaseAction::Undo {
                from_phase: 2,
                to_phase: 1,
                timestamp: now(),
            },
        );
        let lines = render_history(&state.phase_history);
        assert_eq!(
            lines[0],
            "2026-05-04 12:00 completed phase 2 (API) - 0/0 tasks, 1h 2m, commit 0123456"
        );
        assert_eq!(
            lines[1],
            "2026-05-04 12:00 undid verification: phase 3 -> phase 2"
        );
    }
}
