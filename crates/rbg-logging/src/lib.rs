// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Centralized logging utilities for rb-gateway.
//!
//! Every binary entry point (the server, the `trigger-webhooks` one-shot and
//! `reinstall-hooks`) initializes `tracing` through this crate so that log
//! filtering behaves the same everywhere.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Re-export Level for convenience
pub use tracing::Level;

/// Initialize logging with the given component name and default level.
///
/// The `RUST_LOG` environment variable overrides the default when set.
pub fn init(component: &str, default_level: Level) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},{}={}", default_level, component, default_level))
    });

    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry().with(filter).with(layer).try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use tracing::{debug, error, info, warn};

    #[test]
    fn test_log_levels() {
        // Logging before init must not panic.
        error!("Test error message");
        warn!("Test warning message");
        info!("Test info message");
        debug!("Test debug message");
    }
}
