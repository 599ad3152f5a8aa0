//! Shared deterministic types for the phase execution core.
//!
//! These types define the persisted session layout (`.oracle_data/session.json`).
//! Field names are part of the on-disk contract and must stay stable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Setup,
    InProgress,
    Completed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Setup => "setup",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
        }
    }
}

/// One unit of work within a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub description: String,
    pub completed: bool,
    /// Set on first completion and never cleared afterwards.
    pub started_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            completed: false,
            started_at: None,
        }
    }
}

/// Wall-clock bounds of a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Completion counters for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TaskStats {
    pub completed: usize,
    pub total: usize,
    /// 0.0 when the phase has no tasks.
    pub percentage: f64,
}

/// A verified phase completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub phase: usize,
    pub phase_name: String,
    pub completed_at: DateTime<Utc>,
    pub commit_sha: String,
    pub time_spent: String,
    pub tasks_completed: usize,
    pub total_tasks: usize,
}

/// Navigation action recorded in the history. Serialized with an `action` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PhaseAction {
    Rollback {
        rolled_back_to: usize,
        timestamp: DateTime<Utc>,
    },
    Retry {
        phase: usize,
        timestamp: DateTime<Utc>,
    },
    Undo {
        from_phase: usize,
        to_phase: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Entry of the append-only phase history.
///
/// The `action` key is the only discriminator between the two shapes, so the
/// action variant must be tried first when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryEntry {
    Action(PhaseAction),
    Completion(CompletionRecord),
}

impl HistoryEntry {
    pub fn is_completion(&self) -> bool {
        matches!(self, HistoryEntry::Completion(_))
    }

    pub fn as_completion(&self) -> Option<&CompletionRecord> {
        match self {
            HistoryEntry::Completion(record) => Some(record),
            HistoryEntry::Action(_) => None,
        }
    }
}

/// Singleton session state for one project.
///
/// Only `project` and `status` are required on disk; the store checks them
/// before deserializing, everything else falls back to its default.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub project: String,
    pub tech: String,
    pub features: String,
    pub platform: String,
    pub repo_url: String,
    pub phases: Vec<String>,
    pub current_phase: usize,
    pub status: SessionStatus,
    pub phase_tasks: BTreeMap<usize, Vec<Task>>,
    pub phase_time_tracking: BTreeMap<usize, PhaseTiming>,
    pub phase_history: Vec<HistoryEntry>,
}

/// Free-text project brief collected during setup.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ProjectBrief {
    pub project: String,
    pub tech: String,
    pub features: String,
    pub platform: String,
}

impl SessionState {
    /// Store the setup answers. Called once, before planning.
    pub fn configure(&mut self, brief: ProjectBrief) {
        self.project = brief.project;
        self.tech = brief.tech;
        self.features = brief.features;
        self.platform = brief.platform;
    }

    pub fn brief(&self) -> ProjectBrief {
        ProjectBrief {
            project: self.project.clone(),
            tech: self.tech.clone(),
            features: self.features.clone(),
            platform: self.platform.clone(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.phases.is_empty() && self.current_phase >= self.phases.len()
    }
}

/// Result of checking the latest commit for a phase.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct VerifyOutcome {
    pub matched: bool,
    /// Commit message on a match, otherwise the reason for rejection.
    pub message: String,
    pub commit_sha: Option<String>,
}

impl VerifyOutcome {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            matched: false,
            message: reason.into(),
            commit_sha: None,
        }
    }
}

/// Project complexity reported by the autonomous planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPhase {
    pub phase_name: String,
    #[serde(default)]
    pub description: String,
}

/// Structured plan for the autonomous flow.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AutonomousPlan {
    pub project_name: String,
    pub complexity: Complexity,
    #[serde(default)]
    pub phases: Vec<PlanPhase>,
    /// Relative paths of the files to generate, in order.
    pub file_structure: Vec<String>,
    #[serde(default)]
    pub requires_features_input: bool,
    #[serde(default)]
    pub requires_tech_stack_input: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn history_entries_are_distinguished_by_action_key() {
        let raw = r#"[
            {"phase": 0, "phase_name": "Setup", "completed_at": "2026-01-02T03:04:05Z",
             "commit_sha": "abc", "time_spent": "5m", "tasks_completed": 2, "total_tasks": 2},
            {"action": "rollback", "rolled_back_to": 0, "timestamp": "2026-01-02T03:04:05Z"},
            {"action": "undo", "from_phase": 2, "to_phase": 1, "timestamp": "2026-01-02T03:04:05Z"}
        ]"#;
        let entries: Vec<HistoryEntry> = serde_json::from_str(raw).expect("parse");
        assert!(entries[0].is_completion());
        assert_eq!(
            entries[1],
            HistoryEntry::Action(PhaseAction::Rollback {
                rolled_back_to: 0,
                timestamp: ts()
            })
        );
        assert!(!entries[2].is_completion());
    }

    #[test]
    fn action_entries_serialize_with_action_key() {
        let entry = HistoryEntry::Action(PhaseAction::Retry {
            phase: 1,
            timestamp: ts(),
        });
        let value = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(value["action"], "retry");
        assert_eq!(value["phase"], 1);
    }

    #[test]
    fn phase_maps_use_string_keys_on_disk() {
        let mut state = SessionState::default();
        state.phase_tasks.insert(1, vec![Task::new("write tests")]);
        let value = serde_json::to_value(&state).expect("serialize");
        assert!(value["phase_tasks"]["1"].is_array());
        assert_eq!(value["status"], "setup");

        let back: SessionState = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, state);
    }
}
