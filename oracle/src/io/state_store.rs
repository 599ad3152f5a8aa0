//! Session persistence under `.oracle_data/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::core::types::{SessionState, SessionStatus};
use crate::io::atomic::write_atomic;

pub const SESSION_FILE: &str = "session.json";
pub const ARCHIVE_DIR: &str = "archive";

const REQUIRED_KEYS: [&str; 2] = ["project", "status"];
const ARCHIVE_NAME_CHARS: usize = 30;

/// Result of reading the session file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Missing,
    Loaded(SessionState),
    /// The file exists but cannot be used; callers start fresh.
    Corrupt(String),
}

/// Owns the session file and the archive directory of one data dir.
#[derive(Debug, Clone)]
pub struct StateStore {
    data_dir: PathBuf,
}

impl StateStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join(SESSION_FILE)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join(ARCHIVE_DIR)
    }

    pub fn exists(&self) -> bool {
        self.session_path().is_file()
    }

    /// Read the session. Never fails: problems are reported as `Corrupt`.
    pub fn load(&self) -> LoadOutcome {
        let path = self.session_path();
        debug!(path = %path.display(), "loading session");
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return LoadOutcome::Missing,
            Err(err) => return corrupt(&path, format!("read failed: {err}")),
        };
        let value: serde_json::Value = match serde_json::from_str(&contents) {
            Ok(value) => value,
            Err(err) => return corrupt(&path, format!("invalid JSON: {err}")),
        };
        if let Some(missing) = REQUIRED_KEYS.iter().find(|key| value.get(**key).is_none()) {
            return corrupt(&path, format!("missing required key '{missing}'"));
        }
        match serde_json::from_value::<SessionState>(value) {
            Ok(state) if state.status == SessionStatus::InProgress && state.phases.is_empty() => {
                corrupt(&path, "in progress without any phases".to_string())
            }
            Ok(state) => {
                debug!(
                    project = %state.project,
                    status = state.status.as_str(),
                    current_phase = state.current_phase,
                    "session loaded"
                );
                LoadOutcome::Loaded(state)
            }
            Err(err) => corrupt(&path, format!("unexpected layout: {err}")),
        }
    }

    /// `Some` only for a usable saved session.
    pub fn load_or_none(&self) -> Option<SessionState> {
        match self.load() {
            LoadOutcome::Loaded(state) => Some(state),
            LoadOutcome::Missing | LoadOutcome::Corrupt(_) => None,
        }
    }

    /// Atomically write the session (temp file + rename).
    pub fn save(&self, state: &SessionState) -> Result<()> {
        let path = self.session_path();
        debug!(
            path = %path.display(),
            current_phase = state.current_phase,
            status = state.status.as_str(),
            "writing session"
        );
        let mut buf = serde_json::to_string_pretty(state).context("serialize session")?;
        buf.push('\n');
        write_atomic(&path, &buf)
    }

    /// Remove the session file if present.
    pub fn clear(&self) -> Result<()> {
        let path = self.session_path();
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "session cleared");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
        }
    }

    /// Move the session file into `archive/`. Returns the archive path, or
    /// `None` when there was no session file.
    pub fn archive(&self, state: &SessionState, now: DateTime<Utc>) -> Result<Option<PathBuf>> {
        let source = self.session_path();
        if !source.is_file() {
            return Ok(None);
        }
        let dir = self.archive_dir();
        fs::create_dir_all(&dir).with_context(|| format!("create directory {}", dir.display()))?;
        let target = dir.join(archive_file_name(&state.project, now));
        fs::rename(&source, &target).with_context(|| {
            format!("archive {} to {}", source.display(), target.display())
        })?;
        info!(path = %target.display(), "session archived");
        Ok(Some(target))
    }
}

/// `{%Y%m%d_%H%M%S}_{project}.json`, spaces replaced by `_`, project cut to
/// 30 characters.
pub fn archive_file_name(project: &str, now: DateTime<Utc>) -> String {
    let slug: String = project
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| !matches!(c, '/' | '\\'))
        .take(ARCHIVE_NAME_CHARS)
        .collect();
    format!("{}_{slug}.json", now.format("%Y%m%d_%H%M%S"))
}

fn corrupt(path: &Path, reason: String) -> LoadOutcome {
    warn!(path = %path.display(), %reason, "saved session is unusable");
    LoadOutcome::Corrupt(reason)
}
