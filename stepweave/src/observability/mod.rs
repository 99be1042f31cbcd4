//! Tracing subscriber setup.

use crate::config::{LogConfig, LogFormat};
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber described by `config`.
///
/// `RUST_LOG` takes precedence over the configured filter. Returns false when
/// a subscriber is already installed, which leaves it untouched.
pub fn init_tracing(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.format {
        LogFormat::Json => builder
            .json()
            .with_current_span(true)
            .with_span_list(config.with_spans)
            .try_init(),
        LogFormat::Pretty => builder.with_target(false).compact().try_init(),
    };
    installed.is_ok()
}
