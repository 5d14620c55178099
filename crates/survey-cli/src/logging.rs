/*!
Logging and profiling setup for survey-cli.

Two implementations share one API:

- real: compiled with `feature = "profiling"`. Adds a tracing-chrome layer when
  `ENABLE_PROFILING` is set; the trace file is flushed when the returned guard drops.
- stub: logging only.

Log lines go to stderr; stdout is reserved for the JSON report.
*/

fn set_default_filter() {
    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            if cfg!(debug_assertions) {
                std::env::set_var("RUST_LOG", "info,survey_core=debug,survey_cli=debug");
            } else {
                std::env::set_var("RUST_LOG", "info");
            }
        }
    }
}

#[cfg(feature = "profiling")]
mod inner {
    use tracing_chrome::{ChromeLayerBuilder, FlushGuard};
    use tracing_subscriber::prelude::*;

    /// Keeps the chrome trace open until dropped
    pub struct LoggingGuard {
        _chrome: Option<FlushGuard>,
    }

    pub fn setup_logging_and_profiling() -> LoggingGuard {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        super::set_default_filter();

        let (chrome_layer, chrome_guard) = if std::env::var("ENABLE_PROFILING").is_ok() {
            let (layer, guard) = ChromeLayerBuilder::new().include_args(true).build();
            (Some(layer), Some(guard))
        } else {
            (None, None)
        };

        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(EnvFilter::from_default_env());
        tracing_subscriber::registry()
            .with(chrome_layer)
            .with(fmt_layer)
            .init();

        if chrome_guard.is_some() {
            tracing::info!("ENABLE_PROFILING set - writing chrome trace to trace-*.json");
        }
        tracing::debug!(
            "Logging initialized with RUST_LOG={}",
            std::env::var("RUST_LOG").unwrap_or_default()
        );
        LoggingGuard {
            _chrome: chrome_guard,
        }
    }
}

#[cfg(not(feature = "profiling"))]
mod inner {
    use tracing_subscriber::prelude::*;

    pub struct LoggingGuard;

    /// Initialize logging with sensible defaults; profiling is a no-op here.
    pub fn setup_logging_and_profiling() -> LoggingGuard {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        super::set_default_filter();

        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(EnvFilter::from_default_env());
        tracing_subscriber::registry().with(fmt_layer).init();

        tracing::debug!("Logging initialized (profiling disabled in this build)");
        LoggingGuard
    }
}

pub use inner::{LoggingGuard, setup_logging_and_profiling};
