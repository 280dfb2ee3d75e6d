//! A running proxy: one bound listener forwarding to one external service.
//!
//! Instances are normally obtained from a [`ProxyRegistry`](crate::registry::ProxyRegistry),
//! which guarantees one instance per [`InstanceKey`]. Stopping an instance
//! shuts its listener down gracefully and hands the key back to the
//! registry so a later request can create a fresh one.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::ProxyError;
use crate::proxy::client::{build_pooled_client, ProxiedClient};
use crate::server::{self, build_router, InstanceState, Listener};
use crate::settings::{local_proxy_url, InstanceKey, ProxySettings};

/// Callback run once when an instance stops.
pub type OnStop = Box<dyn FnOnce() + Send>;

struct Running {
    listener: Listener,
    on_stop: Option<OnStop>,
}

pub struct ProxyInstance {
    key: InstanceKey,
    settings: Arc<ProxySettings>,
    local_addr: SocketAddr,
    proxy_url: Url,
    running: Mutex<Running>,
    client: OnceLock<ProxiedClient>,
    stopped: AtomicBool,
}

impl ProxyInstance {
    /// Bind the listener for `settings` and start serving.
    ///
    /// The key is taken from `settings` before the port is resolved, so an
    /// instance started with port `0` stays keyed on `0`. Cancelling `cancel`
    /// while the bind is pending fails with [`ProxyError::Cancelled`].
    pub async fn start(
        settings: ProxySettings,
        cancel: &CancellationToken,
        on_stop: Option<OnStop>,
    ) -> Result<Self, ProxyError> {
        let key = settings.key();
        let addr = settings.listen_addr();

        let tcp = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProxyError::Cancelled),
            bound = server::bind(addr) => bound?,
        };
        let local_addr = tcp.local_addr()?;

        let settings = Arc::new(settings.with_resolved_addr(local_addr)?);
        let proxy_url = local_proxy_url(local_addr)?;

        let state = Arc::new(InstanceState {
            settings: Arc::clone(&settings),
            http_client: build_pooled_client(),
        });
        let listener = Listener::serve(tcp, build_router(state))?;

        tracing::info!(
            key = %key,
            addr = %local_addr,
            external_url = %settings.external_url,
            "proxy started"
        );

        Ok(Self {
            key,
            settings,
            local_addr,
            proxy_url,
            running: Mutex::new(Running { listener, on_stop }),
            client: OnceLock::new(),
            stopped: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    /// Resolved settings: `internal_port` and `proxy_url` reflect the bound socket.
    #[must_use]
    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn proxy_url(&self) -> &Url {
        &self.proxy_url
    }

    /// Client preconfigured to send requests through this proxy.
    pub fn client(&self) -> &ProxiedClient {
        self.client
            .get_or_init(|| ProxiedClient::new(self.proxy_url.clone()))
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Release the registry key, then stop serving. In-flight requests are
    /// drained before this returns. Later calls do nothing.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut running = self.running.lock().await;
        if let Some(on_stop) = running.on_stop.take() {
            on_stop();
        }
        running.listener.stop().await;

        tracing::info!(key = %self.key, addr = %self.local_addr, "proxy stopped");
    }
}

impl Drop for ProxyInstance {
    fn drop(&mut self) {
        self.running.get_mut().listener.signal_stop();
    }
}

impl std::fmt::Debug for ProxyInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyInstance")
            .field("key", &self.key)
            .field("local_addr", &self.local_addr)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn settings() -> ProxySettings {
        ProxySettings::new("http://127.0.0.1:9").unwrap()
    }

    #[tokio::test]
    async fn port_zero_binds_an_ephemeral_port() {
        let instance = ProxyInstance::start(settings(), &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_ne!(instance.local_addr().port(), 0);
        assert_eq!(instance.settings().internal_port, instance.local_addr().port());
        assert_eq!(instance.key().as_str(), "http://127.0.0.1:9/;0");
        assert_eq!(
            instance.proxy_url().as_str(),
            format!("http://127.0.0.1:{}/", instance.local_addr().port())
        );
        instance.stop().await;
    }

    #[tokio::test]
    async fn client_is_created_once() {
        let instance = ProxyInstance::start(settings(), &CancellationToken::new(), None)
            .await
            .unwrap();

        let a: *const ProxiedClient = instance.client();
        let b: *const ProxiedClient = instance.client();
        assert_eq!(a, b);
        assert_eq!(instance.client().base_url(), instance.proxy_url());
        instance.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_runs_callback_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let instance = ProxyInstance::start(
            settings(),
            &CancellationToken::new(),
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .await
        .unwrap();

        instance.stop().await;
        instance.stop().await;

        assert!(instance.is_stopped());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stopped_instance_frees_its_port() {
        let instance = ProxyInstance::start(settings(), &CancellationToken::new(), None)
            .await
            .unwrap();
        let addr = instance.local_addr();
        instance.stop().await;

        let rebound = tokio::net::TcpListener::bind(addr).await;
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn occupied_port_fails_with_creation_error() {
        let holder = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = holder.local_addr().unwrap().port();

        let err = ProxyInstance::start(
            settings().with_internal_port(port),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProxyError::Creation { .. }));
    }

    #[tokio::test]
    async fn cancelled_token_aborts_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ProxyInstance::start(settings(), &cancel, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Cancelled));
    }
}
