//! Stable exit codes for oracle CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Missing credentials, invalid configuration, or another unrecoverable error.
pub const INVALID: i32 = 1;
/// The operator declined to resume or start, or cancelled the run.
pub const DECLINED: i32 = 2;
/// A sandbox security check aborted the autonomous flow.
pub const SECURITY: i32 = 3;
