//! Axum listener setup, per-instance shared state, and graceful shutdown.
//!
//! Contains [`InstanceState`] (the `Arc`-shared state every request of one
//! proxy instance sees), [`build_router`] for the catch-all forwarding
//! router with its middleware layers, [`bind`] and [`Listener`] for
//! serving and stopping that router, and [`shutdown_signal`] for SIGTERM / Ctrl+C
//! handling in the binary.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::error::ProxyError;
use crate::proxy;
use crate::proxy::client::PooledClient;
use crate::settings::ProxySettings;

pub struct InstanceState {
    pub settings: Arc<ProxySettings>,
    /// Shared connection pool behind the default upstream client.
    pub http_client: PooledClient,
}

/// Catch-all router. `max_request_body` is enforced inside the pipeline.
pub fn build_router(state: Arc<InstanceState>) -> Router {
    Router::new()
        .fallback(proxy::forward_handler)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Bind a TCP listener, reporting failures as [`ProxyError::Creation`].
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ProxyError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ProxyError::Creation { addr, source })
}

/// A router being served on a bound TCP socket.
pub struct Listener {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Listener {
    /// Start serving `router` on `listener` in a background task.
    pub fn serve(listener: TcpListener, router: Router) -> Result<Self, ProxyError> {
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(addr = %local_addr, error = %e, "listener stopped with error");
            }
        });

        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal graceful shutdown and wait for in-flight requests to finish.
    pub async fn stop(&mut self) {
        self.signal_stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(addr = %self.local_addr, error = %e, "listener task failed");
            }
        }
    }

    /// Signal shutdown without waiting.
    pub fn signal_stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
