use std::env::var;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with a default level given as text (`"debug"`, `"warn"`, ...).
///
/// Unknown levels fall back to `info`. `RUST_LOG` still overrides the default directive.
pub fn init_with_level(level: &str) {
    let level = level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);
    initialize_tracing(level);
}

/// Initialize tracing subscriber with default configuration.
fn initialize_tracing(level: LevelFilter) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_format = var("RUST_LOG_FORMAT").unwrap_or_default();

    let log_layer = match log_format.as_str() {
        "json" => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .without_time()
            .with_filter(env_filter)
            .boxed(),
    };

    // A second initialisation (tests, embedding) keeps the first subscriber.
    if let Err(error) = tracing_subscriber::registry().with(log_layer).try_init() {
        tracing::debug!("Tracing subscriber already installed: {error}");
    }
}
