//! Structured logging for the Strata server.
//!
//! Span-based, filterable logging via the `tracing` ecosystem: console
//! output with uptime timestamps and module paths, plus optional JSON file
//! logging for post-mortem analysis. The filter honours `RUST_LOG` and
//! falls back to the configured level.

use std::path::Path;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter: `info` everywhere, with tokio internals quieted down.
const DEFAULT_FILTER: &str = "info,tokio=warn,mio=warn";

/// Initialize the tracing subscriber for the server process.
///
/// `log_level` is the configured filter string (empty means use the
/// default). `RUST_LOG` in the environment wins over both. When `log_dir`
/// is given, a JSON file layer is added alongside the console.
pub fn init_logging(log_level: &str, log_dir: Option<&Path>) {
    let filter_str = if log_level.is_empty() {
        DEFAULT_FILTER
    } else {
        log_level
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true) // distinguishes the simulation thread from I/O workers
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join("strata.log"))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}

/// An `EnvFilter` with the default filter string, for tests and tools that
/// want consistent behaviour without touching the environment.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_quiets_runtime_noise() {
        let filter_str = format!("{}", default_env_filter());
        assert!(filter_str.contains("tokio=warn"));
        assert!(filter_str.contains("mio=warn"));
        assert!(filter_str.contains("info"));
    }

    #[test]
    fn test_subsystem_filter_parses() {
        let filter = EnvFilter::new("info,strata_net=debug");
        let filter_str = format!("{}", filter);
        assert!(filter_str.contains("strata_net=debug"));
        assert!(filter_str.contains("info"));
    }

    #[test]
    fn test_env_filter_parsing() {
        let valid_filters = [
            "info",
            "debug,strata_sync=trace",
            "warn,strata_net=debug,strata_world=trace",
            "error",
        ];
        for filter_str in &valid_filters {
            assert!(
                EnvFilter::try_from(*filter_str).is_ok(),
                "failed to parse filter: {filter_str}"
            );
        }
    }

    #[test]
    fn test_log_file_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_file_path = temp_dir.path().join("strata.log");
        assert_eq!(log_file_path.file_name().unwrap(), "strata.log");
    }
}
