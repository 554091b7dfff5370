//! Tracing initialization.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Per-target log levels, e.g. `SEMSYNC_LOG=semsync=debug,semsync::db=warn`.
pub const LOG_ENV: &str = "SEMSYNC_LOG";
/// Set to `json` for one JSON object per line.
pub const LOG_FORMAT_ENV: &str = "SEMSYNC_LOG_FORMAT";

const DEFAULT_FILTER: &str = "semsync=info";

static INIT: Once = Once::new();

/// Installs the global subscriber and bridges `log` records into it.
///
/// Falls back to `semsync=info` when `SEMSYNC_LOG` is unset or invalid.
/// Safe to call more than once; only the first call has an effect, and an
/// already installed subscriber is left in place.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let json = std::env::var(LOG_FORMAT_ENV)
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let registry = tracing_subscriber::registry().with(filter);
        let result = if json {
            tracing::subscriber::set_global_default(
                registry.with(fmt::layer().json().with_current_span(true)),
            )
        } else {
            tracing::subscriber::set_global_default(
                registry.with(fmt::layer().with_target(true).with_thread_ids(true)),
            )
        };
        if let Err(e) = result {
            eprintln!("semsync: tracing subscriber not installed: {}", e);
            return;
        }

        // The db layer logs through the `log` facade.
        if let Err(e) = tracing_log::LogTracer::init() {
            eprintln!("semsync: log bridge not installed: {}", e);
        }
    });
}
