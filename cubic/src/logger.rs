//! Log output for the runner.

use tracing::subscriber;
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

/// Directive used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Installs the global tracing subscriber and routes `log` records into it.
///
/// Filtering follows `RUST_LOG` and falls back to [`DEFAULT_DIRECTIVE`].
pub fn init() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_thread_names(true));

    LogTracer::init()?;
    subscriber::set_global_default(subscriber)?;
    Ok(())
}
