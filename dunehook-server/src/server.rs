//! Process lifecycle: connect and migrate the store, serve, then close the store.
//!
//! The listener is only bound after schema initialization succeeds, so no request
//! is ever handled against a store that is not ready.

use std::sync::Arc;

use dunehook_core::{open_store, Authenticator, DunehookConfig};
use tokio::sync::broadcast;

use crate::http::{start_http_server, HttpState};

pub async fn run(config: DunehookConfig) -> anyhow::Result<()> {
    let auth = Authenticator::from_config(&config.webhook)?;

    let store = open_store(&config.storage).await?;
    match store.health_check().await {
        Ok(v) => tracing::info!(backend = store.name(), "Connected to {}", v),
        Err(e) => tracing::warn!(backend = store.name(), error = %e, "Store probe failed"),
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    let state = Arc::new(HttpState {
        store: store.clone(),
        auth,
        config,
    });

    let served = start_http_server(state, tx.subscribe()).await;

    store.close().await;
    tracing::info!(backend = store.name(), "Store closed");

    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
