use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

use crate::util::config::LogFormat;

/// Initialize tracing
pub fn init(format: LogFormat) -> Result<(), SetGlobalDefaultError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Compact => {
            let logger = tracing_subscriber::fmt::layer().compact();
            let subscriber = Registry::default().with(logger).with(env_filter);
            tracing::subscriber::set_global_default(subscriber)
        }
        LogFormat::Json => {
            let logger = tracing_subscriber::fmt::layer().json();
            let subscriber = Registry::default().with(logger).with(env_filter);
            tracing::subscriber::set_global_default(subscriber)
        }
    }
}
