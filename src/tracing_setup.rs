use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ApplicationConfig, LogFormat};

/// Build the level filter. `RUST_LOG` wins over the configured level.
pub fn build_env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}")),
    }
}

/// Initialize the global subscriber with the given level and output format.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing_with_config(level: &str, format: LogFormat) -> Result<()> {
    let env_filter = build_env_filter(level)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    match format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(fmt_layer.json().with_current_span(false).with_span_list(true))
            .try_init()
            .wrap_err("Failed to install JSON subscriber")?,
        LogFormat::Pretty => Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init()
            .wrap_err("Failed to install pretty subscriber")?,
    }

    tracing::info!(level, ?format, "portico logging initialized");
    Ok(())
}

pub fn init_from_config(application: &ApplicationConfig) -> Result<()> {
    init_tracing_with_config(&application.log_level, application.log_format)
}
