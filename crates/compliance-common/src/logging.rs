//! Tracing bootstrap shared by every component of the appliance binary.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Format selection for the process-wide subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Install the global tracing subscriber. Call once from the binary's
/// `main`. `RUST_LOG` (or "info" if unset) controls verbosity.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Compact => {
            registry.with(fmt::layer().compact()).init();
        }
        LogFormat::Json => {
            registry.with(fmt::layer().json()).init();
        }
    }
}
