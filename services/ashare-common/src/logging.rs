//! Logging setup for the A-share data services.
//!
//! Output is either human-readable (`pretty`) or one JSON object per line
//! (`json`). Noisy HTTP and TLS crates are pinned to `warn` so that fetch
//! logs stay readable; `RUST_LOG` overrides everything.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Library modules filtered to `warn` regardless of the base level.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
];

/// Filter directives for a base level with noise suppression applied.
pub fn filter_directives(log_level: &str) -> String {
    let level = match log_level.trim().to_lowercase().as_str() {
        "" => "info".to_string(),
        other => other.to_string(),
    };

    let mut directives = level;
    for module in NOISY_MODULES {
        directives.push_str(&format!(",{module}=warn"));
    }
    directives
}

fn build_filter(log_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    EnvFilter::try_new(filter_directives(log_level))
        .unwrap_or_else(|_| EnvFilter::new(filter_directives("info")))
}

/// Initialize the global subscriber.
///
/// * `log_level` - Base log level (trace, debug, info, warn, error)
/// * `log_format` - `"json"` for structured output, anything else for pretty
///
/// Calling this twice is harmless; the second call leaves the first
/// subscriber in place.
pub fn init_logging(log_level: &str, log_format: &str) {
    let filter = build_filter(log_level);
    let subscriber = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .with_writer(std::io::stderr);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::debug!(
        log_level = %log_level,
        log_format = %log_format,
        noise_filtered = NOISY_MODULES.len(),
        "Logging initialized"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives_suppress_noise() {
        let directives = filter_directives("debug");
        assert!(directives.starts_with("debug,"));
        for module in NOISY_MODULES {
            assert!(directives.contains(&format!("{module}=warn")));
        }
    }

    #[test]
    fn test_filter_directives_defaults_blank_level() {
        assert!(filter_directives("  ").starts_with("info,"));
        assert!(filter_directives("WARN").starts_with("warn,"));
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging("info", "pretty");
        init_logging("debug", "json");
    }
}
