//! Resumable snapshot of an autonomous generation run.
//!
//! Independent of the phase session store: separate file, separate types.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::types::{AutonomousPlan, Complexity};
use crate::io::atomic::write_atomic;

pub const SNAPSHOT_FILE: &str = ".autonomous_session.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    GeneratingFiles,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub idea: String,
    pub plan: AutonomousPlan,
    pub repo_url: String,
    pub workspace_path: PathBuf,
    pub branch_name: String,
    /// Index into `plan.file_structure` of the next file to generate.
    pub current_file_index: usize,
    pub complexity: Complexity,
    pub status: SnapshotStatus,
}

impl SessionSnapshot {
    pub fn remaining_files(&self) -> &[String] {
        let files = &self.plan.file_structure;
        &files[self.current_file_index.min(files.len())..]
    }
}

/// Result of reading the snapshot file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotLoad {
    Missing,
    Loaded(SessionSnapshot),
    /// Present but unreadable; callers discard it and start a new run.
    Corrupt(String),
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Rewrite the whole snapshot.
    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        debug!(
            path = %self.path.display(),
            current_file_index = snapshot.current_file_index,
            "writing snapshot"
        );
        let mut buf = serde_json::to_string_pretty(snapshot).context("serialize snapshot")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }

    pub fn load(&self) -> SnapshotLoad {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return SnapshotLoad::Missing,
            Err(err) => return self.corrupt(format!("read failed: {err}")),
        };
        match serde_json::from_str(&contents) {
            Ok(snapshot) => SnapshotLoad::Loaded(snapshot),
            Err(err) => self.corrupt(format!("invalid snapshot: {err}")),
        }
    }

    fn corrupt(&self, reason: String) -> SnapshotLoad {
        warn!(path = %self.path.display(), %reason, "snapshot unreadable");
        SnapshotLoad::Corrupt(reason)
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "snapshot cleared");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PlanPhase;

    fn snapshot(index: usize) -> SessionSnapshot {
        SessionSnapshot {
            idea: "a todo app".to_string(),
            plan: AutonomousPlan {
                project_name: "Todo".to_string(),
                complexity: Complexity::Medium,
                phases: vec![PlanPhase {
                    phase_name: "Core".to_string(),
                    description: "models".to_string(),
                }],
                file_structure: vec!["src/main.rs".to_string(), "README.md".to_string()],
                ..AutonomousPlan::default()
            },
            repo_url: "https://github.com/acme/todo".to_string(),
            workspace_path: PathBuf::from("/tmp/ws"),
            branch_name: "ai/todo".to_string(),
            current_file_index: index,
            complexity: Complexity::Medium,
            status: SnapshotStatus::GeneratingFiles,
        }
    }

    #[test]
    fn load_absent_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(temp.path().join(SNAPSHOT_FILE));
        assert!(!store.exists());
        assert_eq!(store.load(), SnapshotLoad::Missing);
    }

    #[test]
    fn save_overwrites_whole_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(temp.path().join(SNAPSHOT_FILE));

        store.save(&snapshot(0)).expect("save");
        store.save(&snapshot(1)).expect("save");

        let SnapshotLoad::Loaded(loaded) = store.load() else {
            panic!("snapshot should load");
        };
        assert_eq!(loaded, snapshot(1));
        assert_eq!(loaded.remaining_files(), ["README.md".to_string()]);
    }

    #[test]
    fn clear_removes_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(temp.path().join(SNAPSHOT_FILE));
        store.save(&snapshot(0)).expect("save");
        store.clear().expect("clear");
        store.clear().expect("clear again");
        assert!(!store.exists());
    }

    #[test]
    fn unparseable_snapshot_is_corrupt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(temp.path().join(SNAPSHOT_FILE));
        for contents in ["[]", "{truncated", r#"{"idea": "x"}"#] {
            fs::write(store.path(), contents).expect("write");
            assert!(
                matches!(store.load(), SnapshotLoad::Corrupt(_)),
                "{contents} should be corrupt"
            );
        }
    }
}
