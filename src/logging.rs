//! # Structured Logging Module
//!
//! Tracing initialization for the dispatch engine. Console output by default,
//! JSON when `REPOINDEX_LOG_FORMAT=json` (for log shippers in production).

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process.
///
/// The filter comes from `REPOINDEX_LOG` (standard `EnvFilter` syntax),
/// defaulting to `info`. Safe to call from multiple entry points; later
/// calls are no-ops, and an already-installed global subscriber (e.g. from
/// a test harness) is left in place.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_env("REPOINDEX_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let json_output = std::env::var("REPOINDEX_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let result = if json_output {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true).with_ansi(false).json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true))
                .try_init()
        };

        if result.is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }
    });
}
