use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Output shape for engine logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    #[default]
    Compact,
}

/// Install the global tracing subscriber. `RUST_LOG` wins over
/// `default_level`. Errors if a subscriber is already set, which embedding
/// applications that bring their own logging can ignore.
pub fn init_logging(format: LogFormat, default_level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_level.into());
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true);
            registry.with(fmt_layer).try_init()?;
        }
        LogFormat::Compact => {
            let fmt_layer = tracing_subscriber::fmt::layer().compact().with_target(false);
            registry.with(fmt_layer).try_init()?;
        }
    }

    info!(logging.format = ?format, logging.level = default_level, "logging initialized");
    Ok(())
}
