//! Logging bootstrap for binaries.
//!
//! The library only emits `tracing` events; a binary calls [`init_logging`]
//! once to install a subscriber. Logs go to stderr so they do not interleave
//! with streamed replies on stdout.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Modules pinned at `warn` unless `RUST_LOG` says otherwise.
pub const NOISY_MODULES: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls", "mio"];

/// Builds the filter: `RUST_LOG` if set, else `log_level` with noisy modules
/// quieted.
pub fn build_filter(log_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(directives(log_level))
}

fn directives(log_level: &str) -> String {
    let mut directives = String::from(log_level);
    for module in NOISY_MODULES {
        directives.push_str(&format!(",{module}=warn"));
    }
    directives
}

/// Installs the global subscriber.
///
/// `log_format` is `json` for structured output; anything else is
/// human-readable. Calling this twice leaves the first subscriber in place.
pub fn init_logging(log_level: &str, log_format: &str) {
    let subscriber = tracing_subscriber::registry().with(build_filter(log_level));

    if log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_target(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::debug!(log_level, log_format, "logging initialized");
}
