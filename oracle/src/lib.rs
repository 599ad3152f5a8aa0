//! Resumable, phase-based project execution with a sandboxed autonomous mode.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (phase state machine, task ledger,
//!   history, command parsing). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (state files, git, HTTP
//!   collaborators, terminal). Behind traits where tests need fakes.
//! - **[`agents`]**: Generation and verification built on the LLM and GitHub
//!   adapters.
//!
//! Orchestration modules ([`session`], [`execute`], [`autonomous`]) coordinate
//! core logic with I/O to implement the CLI commands.

pub mod agents;
pub mod autonomous;
pub mod core;
pub mod execute;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
