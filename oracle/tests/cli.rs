//! CLI tests for the oracle binary.
//!
//! Spawns the binary in a scratch directory and checks exit codes and the
//! plain-text output of the state inspection commands.

use std::path::Path;
use std::process::{Command, Output, Stdio};

use oracle::exit_codes;
use oracle::io::state_store::StateStore;
use oracle::test_support::session_with_phases;

fn oracle(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_oracle"))
        .current_dir(dir)
        .args(args)
        .env_remove("GROQ_API_KEY")
        .env_remove("GITHUB_TOKEN")
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .output()
        .expect("spawn oracle")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn run_without_api_key_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = oracle(temp.path(), &["run"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("GROQ_API_KEY"));
    assert!(!temp.path().join(".oracle_data").exists());
}

#[test]
fn status_without_session_succeeds() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = oracle(temp.path(), &["status"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&output).trim(), "No saved session.");
}

#[test]
fn status_reports_the_current_phase() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = StateStore::new(temp.path().join(".oracle_data"));
    store
        .save(&session_with_phases(&["Phase 1: Setup", "Phase 2: API"]))
        .expect("save");

    let output = oracle(temp.path(), &["status"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let text = stdout(&output);
    assert!(text.contains("Project: Todo"));
    assert!(text.contains("Phase 1 of 2: Setup"));
    assert!(text.contains("Verified phases: 0"));
}

#[test]
fn archive_moves_the_session_and_reset_clears_it() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = StateStore::new(temp.path().join("state"));
    store.save(&session_with_phases(&["Phase 1: Setup"])).expect("save");

    let output = oracle(temp.path(), &["--data-dir", "state", "archive"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(!store.exists());
    let archived: Vec<_> = std::fs::read_dir(store.archive_dir())
        .expect("archive dir")
        .collect();
    assert_eq!(archived.len(), 1);

    store.save(&session_with_phases(&["Phase 1: Setup"])).expect("save");
    let output = oracle(temp.path(), &["reset", "--data-dir", "state"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(!store.exists());
}

#[test]
fn history_of_an_unreadable_session_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = StateStore::new(temp.path().join(".oracle_data"));
    std::fs::create_dir_all(store.data_dir()).expect("mkdir");
    std::fs::write(store.session_path(), "{\"project\": ").expect("write");

    let output = oracle(temp.path(), &["history"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(store.exists());
}
