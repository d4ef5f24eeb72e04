//! Logging setup
//!
//! Sampler attempts log at `debug`, conditions met at `info`, expiries and
//! best-effort cleanup failures at `warn`. Output goes through libtest's
//! capture, so passing tests stay quiet.
//!
//! The filter is read from `VIRTWAIT_LOG`, then `RUST_LOG`. Without either,
//! virtwait logs at `info` and its dependencies (kube, hyper, rustls) at `warn`.
//!
//! # Example
//!
//! ```no_run
//! use virtwait::telemetry::init_logging;
//!
//! // VIRTWAIT_LOG=virtwait::sampler=debug cargo test -- --ignored
//! init_logging();
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "warn,virtwait=info";

/// Filter directives from the two environment variables, first non-empty wins
fn filter_directives(virtwait_log: Option<&str>, rust_log: Option<&str>) -> String {
    [virtwait_log, rust_log]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|d| !d.is_empty())
        .unwrap_or(DEFAULT_DIRECTIVES)
        .to_string()
}

/// Install a fmt subscriber writing through the test harness
///
/// Safe to call more than once; later calls are no-ops. Invalid directives
/// fall back to the default filter.
pub fn init_logging() {
    let directives = filter_directives(
        std::env::var("VIRTWAIT_LOG").ok().as_deref(),
        std::env::var("RUST_LOG").ok().as_deref(),
    );
    let filter =
        EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_test_writer(),
        )
        .try_init();
}
