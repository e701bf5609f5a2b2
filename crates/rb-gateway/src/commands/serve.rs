// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The `serve` command: run the gateway until told otherwise.
//!
//! The serve loop owns the configuration watcher and the OS signal streams.
//! Configuration changes are hot-swapped into the running API; SIGHUP forces
//! a reload; SIGINT and SIGTERM trigger a graceful shutdown with a grace
//! period for in-flight requests.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use rbg_api::Api;
use rbg_config::{Config, ConfigWatcher};

use super::install_all_hooks;

/// How long in-flight requests get to finish on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub async fn run(config_path: &Path) -> anyhow::Result<()> {
    // Hook scripts embed the configuration path and run from the repository
    // directory, so it has to be absolute.
    let config_path = config_path
        .canonicalize()
        .with_context(|| format!("Could not resolve configuration path {}", config_path.display()))?;

    let mut watcher = ConfigWatcher::watch(&config_path);

    let config = tokio::select! {
        cfg = watcher.new_config.recv() => match cfg {
            Some(cfg) => cfg,
            None => bail!("Configuration watcher shut down unexpectedly"),
        },

        err = watcher.errors.recv() => {
            bail!(
                "Unable to load configuration file {}: {}. See installation instructions \
                 at http://www.reviewboard.org/docs/rbgateway/latest/installation/",
                config_path.display(),
                err.map(|e| e.to_string()).unwrap_or_default()
            );
        }
    };

    if config.uses_memory_token_store() {
        bail!("Cannot use memory store outside of tests.");
    }

    let api = Api::new(config.clone()).context("Could not create API")?;

    install_all_hooks(&config, &config_path, false);

    let mut hup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let handle = Handle::new();
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = api.router().into_make_service();

    let mut server = if config.use_tls {
        let tls = RustlsConfig::from_pem_file(&config.ssl_certificate, &config.ssl_key)
            .await
            .context("Could not load TLS certificate")?;

        tokio::spawn(axum_server::bind_rustls(addr, tls).handle(handle.clone()).serve(app))
    } else {
        tokio::spawn(axum_server::bind(addr).handle(handle.clone()).serve(app))
    };

    info!("Starting rb-gateway server on port {}", config.port);
    info!("Quit the server with CONTROL-C.");

    loop {
        tokio::select! {
            result = &mut server => {
                result.context("Server task failed")??;
                bail!("Server exited unexpectedly");
            }

            new_config = watcher.new_config.recv() => {
                let Some(new_config) = new_config else {
                    bail!("Configuration watcher shut down unexpectedly");
                };

                info!("Detected configuration change, reloading...");
                apply_config(&api, new_config, &config_path).await;
            }

            err = watcher.errors.recv() => {
                bail!(
                    "Unexpected error: {}",
                    err.map(|e| e.to_string()).unwrap_or_default()
                );
            }

            _ = hup.recv() => {
                info!("Received SIGHUP, reloading configuration...");

                match watcher.force_reload().await {
                    Ok(new_config) => apply_config(&api, new_config, &config_path).await,
                    Err(err) => bail!("Unexpected error: {}", err),
                }
            }

            _ = interrupt.recv() => {
                info!("Received SIGINT, shutting down...");
                info!("CONTROL-C again to force quit.");
                break;
            }

            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }
        }
    }

    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));

    tokio::select! {
        result = &mut server => {
            if let Err(err) = result.context("Server task failed")? {
                error!("An error occurred while shutting down the server: {}", err);
            }
        }

        _ = interrupt.recv() => {
            warn!("Forcing shutdown.");
            handle.shutdown();
            let _ = (&mut server).await;
        }
    }

    info!("Server shut down.");

    // Fence any handler that still holds a token-store reference before
    // persisting.
    if api.save_token_store().await.is_err() {
        bail!("Could not save token store");
    }

    Ok(())
}

/// Swap a freshly loaded configuration into the running API.
///
/// On any failure the previous configuration stays active.
async fn apply_config(api: &Api, config: Config, config_path: &Path) {
    if config.uses_memory_token_store() {
        error!("Failed to reload configuration: cannot use memory store outside of tests.");
        error!("Configuration was not reloaded.");
        return;
    }

    let new_config = config.clone();

    match api.set_config(config).await {
        Ok(()) => {
            info!("Configuration reloaded.");

            // New repositories may have appeared; installing is idempotent
            // for the ones already set up.
            install_all_hooks(&new_config, config_path, false);
        }

        Err(err) => {
            error!("Failed to reload configuration: {}", err);
        }
    }
}
