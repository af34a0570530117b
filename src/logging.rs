//! Logging and tracing initialization

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "sensorstream=info";

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to create log filter: {0}")]
    Filter(String),

    #[error("Logging already initialized: {0}")]
    Init(String),
}

/// Initialize structured logging.
///
/// `RUST_LOG` takes precedence over `directives`.
pub fn init_logging(json: bool, directives: Option<&str>) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives.unwrap_or(DEFAULT_FILTER)))
        .map_err(|e| LoggingError::Filter(e.to_string()))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if json {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::NONE)
                    .json(),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_span_events(FmtSpan::NONE)
                    .compact(),
            )
            .try_init()
    };

    result.map_err(|e| LoggingError::Init(e.to_string()))
}

/// Test logging, safe to call from every test
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("sensorstream=debug"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_test_writer().with_target(false).compact())
            .try_init()
            .ok();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_directive_is_rejected() {
        // Only reachable when RUST_LOG is unset
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(matches!(
                init_logging(false, Some("sensorstream=notalevel")),
                Err(LoggingError::Filter(_))
            ));
        }
    }

    #[test]
    fn test_init_test_logging_twice() {
        init_test_logging();
        init_test_logging();
    }
}
