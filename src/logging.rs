//! Logging setup
//!
//! Rolling file output plus a colored stdout stream, driven by the logging
//! section of the config. Dispatch logs carry their own context fields
//! (trx codes, supplier codes, attempt numbers), so the default filter
//! quiets the chatty infrastructure targets that would drown them out;
//! `RUST_LOG` overrides everything when set.

use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let rotation = match config.rotation.as_str() {
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        _ => Rotation::NEVER,
    };
    let file_appender = RollingFileAppender::new(rotation, &config.log_dir, &config.log_file);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.log_level)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        // Machine-readable file stream for log shipping; targets stay in so
        // settlement events can be queried per module.
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(file_writer)
                    .with_ansi(false),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(file_writer)
                    .with_ansi(false),
            )
            .with(fmt::layer().with_target(false).with_ansi(true))
            .init();
    }

    guard
}

/// Base level for the dispatcher, with SQL statement logging and HTTP
/// plumbing capped at warn so supplier-call and ledger traces stay readable.
fn default_directives(level: &str) -> String {
    format!("{level},sqlx=warn,hyper=warn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        let directives = default_directives("debug");
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("sqlx=warn"));
        // Must be a valid EnvFilter spec.
        assert!(directives.parse::<EnvFilter>().is_ok());
    }
}
