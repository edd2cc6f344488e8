/// Structured logging setup using tracing
///
/// Writes to stderr. Auto-detects format: human-readable with ANSI colors
/// when stderr is a terminal, structured JSON when piped/redirected.

use std::io::IsTerminal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Initialize tracing subscriber with stderr output
///
/// Log level from config.log_level (default: info).
/// RUST_LOG env var can override at runtime.
pub fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let stderr_is_terminal = std::io::stderr().is_terminal();

    if stderr_is_terminal {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    } else {
        // Structured JSON format for pipes/redirects
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .init();
    }
}
