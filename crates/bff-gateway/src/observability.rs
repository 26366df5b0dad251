// Tracing initialization from the logging section of the configuration.
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

use crate::config::LoggingConfig;

pub fn init_tracing(logging: &LoggingConfig) {
    // Prefer RUST_LOG from env, otherwise use the configured level.
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(&logging.level));

    let fmt_layer = if logging.format.eq_ignore_ascii_case("json") {
        fmt::layer().json().with_current_span(true).boxed()
    } else {
        fmt::layer().boxed()
    };

    // try_init: tests may install a subscriber more than once per process
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
