//! Structured logging setup for fleetpack
//!
//! Wraps `tracing-subscriber` so the binary and the integration tests share
//! one initialization path. Console output is the default; JSON output is
//! available for log shipping.
//!
//! # Example
//!
//! ```no_run
//! use fleetpack::util::logging;
//! use tracing::info;
//!
//! // FLEETPACK_LOG_LEVEL=debug FLEETPACK_LOG_JSON=true
//! logging::init_from_env();
//! info!(service = "billing", "Service packaged");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Ensures logging is only initialized once
static INIT: Once = Once::new();

const NOISY_CRATES: [&str; 4] = ["h2", "hyper", "reqwest", "bollard"];

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum log level to display
    pub level: Level,

    /// Use JSON output format
    pub use_json: bool,

    /// Include the module target (e.g., fleetpack::resolve) in logs
    pub include_target: bool,

    /// Include file and line number information
    pub include_location: bool,

    /// Include thread ID and name in logs
    pub include_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
            include_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// JSON output with thread ids and source locations, for unattended runs.
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
            include_thread_ids: true,
        }
    }

    /// Builds the `EnvFilter` for this configuration. Noisy HTTP and Docker
    /// client crates are pinned to warn unless `RUST_LOG` says otherwise.
    pub fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::from_default_env();
        if let Some(directive) = parse_directive(&format!("fleetpack={}", self.level)) {
            filter = filter.add_directive(directive);
        }
        if env::var("RUST_LOG").is_err() {
            for name in NOISY_CRATES {
                if let Some(directive) = parse_directive(&format!("{}=warn", name)) {
                    filter = filter.add_directive(directive);
                }
            }
        }
        filter
    }
}

fn parse_directive(raw: &str) -> Option<Directive> {
    raw.parse().ok()
}

/// Parses a log level from a string
///
/// Returns `Level::INFO` for anything unrecognised.
///
/// ```
/// use fleetpack::util::logging::parse_level;
/// use tracing::Level;
///
/// assert_eq!(parse_level("debug"), Level::DEBUG);
/// assert_eq!(parse_level("WARN"), Level::WARN);
/// ```
pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

/// Initializes the logging system. Subsequent calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = config.env_filter();

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_thread_ids(config.include_thread_ids)
                        .with_thread_names(config.include_thread_ids),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_thread_ids(config.include_thread_ids)
                        .with_thread_names(config.include_thread_ids),
                )
                .init();
        }
    });
}

pub fn init_default() {
    init_logging(LoggingConfig::default());
}

/// Reads `FLEETPACK_LOG_LEVEL` and `FLEETPACK_LOG_JSON`.
pub fn init_from_env() {
    init_logging(config_from_env());
}

fn config_from_env() -> LoggingConfig {
    let level_str = env::var("FLEETPACK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let use_json = env::var("FLEETPACK_LOG_JSON")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);

    LoggingConfig {
        level: parse_level(&level_str),
        use_json,
        ..Default::default()
    }
}

/// CLI precedence: explicit level, then `-v`, then `-q`, then the environment.
pub fn config_from_flags(log_level: Option<&str>, verbose: bool, quiet: bool) -> LoggingConfig {
    let base = config_from_env();
    let level = if let Some(level_str) = log_level {
        parse_level(level_str)
    } else if verbose {
        Level::DEBUG
    } else if quiet {
        Level::ERROR
    } else {
        base.level
    };
    LoggingConfig { level, ..base }
}
