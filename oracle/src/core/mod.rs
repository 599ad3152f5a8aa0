//! Deterministic, pure logic for the phase workflow.
//!
//! Core modules must be free of I/O side effects. Anything that needs the
//! current time takes it as an argument so tests stay reproducible.

pub mod branch;
pub mod commands;
pub mod history;
pub mod ledger;
pub mod machine;
pub mod phase_label;
pub mod types;
