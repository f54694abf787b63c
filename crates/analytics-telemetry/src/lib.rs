//! Structured logging setup shared by the daemon and drain worker binaries.
//!
//! A single [`init_tracing`] entry point so both processes log in exactly
//! the same shape; `RUST_LOG` always wins when set, otherwise the level
//! comes from configuration.

use tracing_subscriber::EnvFilter;

/// Initialize the global `tracing` subscriber.
///
/// `log_level` is one of `trace`/`debug`/`info`/`warn`/`error` (validated
/// by `analytics_config::validate_config` before this is called). When
/// `json` is true, events are emitted as newline-delimited JSON instead of
/// the human-readable compact format.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("analytics={log_level},tower_http=info")));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if json {
        subscriber.json().init();
    } else {
        subscriber.compact().init();
    }
}
