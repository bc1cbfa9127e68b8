//! Tracing subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable overriding the configured filter.
pub const LOG_ENV: &str = "MINUTA_LOG";

/// Install the global subscriber, writing to stderr. `MINUTA_LOG` takes
/// precedence over `level`. Calling this twice is harmless.
pub fn init(level: &str, json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr)))
        .try_init();

    if let Err(e) = result {
        eprintln!("Warning: logging already initialised: {}", e);
    }
}
