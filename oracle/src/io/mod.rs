//! Side-effecting adapters: files, processes, git, HTTP and the terminal.

pub mod atomic;
pub mod config;
pub mod console;
pub mod git;
pub mod github;
pub mod llm;
pub mod process;
pub mod prompt;
pub mod repo_context;
pub mod sandbox;
pub mod snapshot;
pub mod state_store;
