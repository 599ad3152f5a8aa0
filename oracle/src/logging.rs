//! Diagnostic tracing for the oracle binary.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   Never part of the operator-facing output.
//!
//! - **Operator output (`io/console`)**: Plain lines on stdout, unaffected by
//!   `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const QUIET: &str = "warn";
const VERBOSE: &str = "warn,oracle=debug";

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `verbose` selects between warnings only
/// and debug output for this crate.
///
/// # Example
/// ```bash
/// RUST_LOG=oracle::io=debug oracle run
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbose).compact())
        .init();
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose { VERBOSE } else { QUIET }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_directive_parses() {
        assert_eq!(default_directive(false), "warn");
        assert!(EnvFilter::try_new(default_directive(true)).is_ok());
    }
}
