//! Logging setup for rooms binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Build the default filter directive for the given targets.
///
/// Each target gets `default_log_level`; `tower_http` is pinned to `debug`
/// so request traces show up alongside engine logs.
pub fn default_directive(targets: &[&str], default_log_level: &str) -> String {
    let mut directives: Vec<String> = targets
        .iter()
        .map(|target| format!("{}={}", target.replace('-', "_"), default_log_level))
        .collect();
    directives.push("tower_http=debug".to_string());
    directives.join(",")
}

/// Initialize the tracing subscriber.
///
/// The filter can be overridden with the `RUST_LOG` environment variable.
///
/// # Arguments
///
/// * `targets` - Crate and binary names that should log at `default_log_level`
/// * `default_log_level` - e.g. "debug", "info", "warn"
///
/// # Examples
///
/// ```no_run
/// use rooms_shared::logger::setup_logger;
///
/// setup_logger(&["rooms_server", "rooms-server"], "debug");
/// ```
pub fn setup_logger(targets: &[&str], default_log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive(targets, default_log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
