//! Signal handling for graceful shutdown and config reload.

use crate::config::ConfigLoader;
use leadpay_core::config::SharedConfig;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;

/// Creates a future that completes when a shutdown signal is received.
///
/// Listens for SIGTERM and SIGINT (Ctrl+C).
pub async fn shutdown_signal() {
    let sigterm = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = sigterm => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for SIGINT, shutting down");
            } else {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    }
}

/// Spawns a task that listens for SIGHUP and reloads the configuration.
///
/// Price bands, pricing, purchase and refund policies and the notifier
/// section are swapped in place; components holding them see the new
/// values on their next read. Returns a Notify that stops the task.
pub fn spawn_config_reload_handler(
    config: SharedConfig,
    config_loader: Arc<ConfigLoader>,
) -> Arc<Notify> {
    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_notify_clone = shutdown_notify.clone();

    tokio::spawn(async move {
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(sighup) => sighup,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGHUP handler; reload disabled");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP, reloading configuration");
                    match config_loader.reload() {
                        Ok(loaded_config) => {
                            loaded_config.apply_reload(&config).await;
                            tracing::info!(
                                bands_version = config.bands.version(),
                                "Configuration reloaded successfully"
                            );
                        }
                        Err(e) => {
                            tracing::error!(
                                error = %e,
                                "Failed to reload configuration; keeping the current one"
                            );
                        }
                    }
                }
                _ = shutdown_notify_clone.notified() => {
                    tracing::debug!("Config reload handler shutting down");
                    break;
                }
            }
        }
    });

    shutdown_notify
}
