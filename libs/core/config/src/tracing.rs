use crate::Environment;
use tracing::debug;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Install color-eyre report hooks. Safe to call more than once.
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

fn default_filter(environment: &Environment) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| match environment {
        Environment::Production => EnvFilter::new("info,lapin=warn,mongodb=warn"),
        Environment::Development => EnvFilter::new("debug,lapin=info,mongodb=info,hyper=info"),
        Environment::Test => EnvFilter::new("warn"),
    })
}

/// Initialize the global subscriber.
///
/// - Production: flattened JSON lines, no module targets.
/// - Development and test: pretty output.
///
/// Both variants carry the `ErrorLayer` so eyre reports include span traces.
/// `RUST_LOG` overrides the default filter. Calling this twice is a no-op.
pub fn init_tracing(environment: &Environment) {
    let filter = default_filter(environment);

    let result = if environment.is_production() {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false)
                    .pretty(),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    };

    match result {
        Ok(_) => tracing::info!(environment = ?environment, "tracing initialized"),
        Err(_) => debug!("tracing already initialized"),
    }
}
