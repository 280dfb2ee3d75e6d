//! Outbound HTTP clients.
//!
//! [`HttpClient`] is the seam the pipeline sends upstream requests
//! through; settings hooks can replace or wrap it. [`UpstreamClient`] is
//! the default implementation, a connection-pooled hyper client bound to
//! the external URL with the configured timeout. [`ProxiedClient`] points
//! the same kind of pooled client at a running proxy's local address.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{Method, Request, Response, Uri};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use url::Url;

use crate::error::ProxyError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type ResponseBody = BoxBody<Bytes, BoxError>;

pub type HttpsConnector =
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;
pub type PooledClient = Client<HttpsConnector, Full<Bytes>>;

// async_trait is required here because HttpClient is used as Arc<dyn HttpClient>
// and native async fn in traits does not support dyn dispatch.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: Request<Full<Bytes>>) -> Result<Response<ResponseBody>, ProxyError>;
}

/// Wrap already-buffered bytes as a [`ResponseBody`].
#[must_use]
pub fn full_body(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed()
}

#[must_use]
pub fn build_pooled_client() -> PooledClient {
    // rustls refuses to guess when more than one crypto provider is linked in.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .build(https)
}

/// Resolve a possibly relative request URI against `base`.
fn resolve_uri(base: &Url, uri: &Uri) -> Result<Uri, ProxyError> {
    if uri.scheme().is_some() {
        return Ok(uri.clone());
    }
    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let joined = base.join(path_and_query)?;
    joined
        .as_str()
        .parse::<Uri>()
        .map_err(|e| ProxyError::InvalidRequest { source: Box::new(e) })
}

/// Default outbound client for a proxy instance.
#[derive(Clone)]
pub struct UpstreamClient {
    client: PooledClient,
    base_url: Url,
    timeout: Option<Duration>,
}

impl UpstreamClient {
    #[must_use]
    pub fn new(client: PooledClient, base_url: Url, timeout: Option<Duration>) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn send_buffered(
        &self,
        mut request: Request<Full<Bytes>>,
    ) -> Result<Response<ResponseBody>, ProxyError> {
        *request.uri_mut() = resolve_uri(&self.base_url, request.uri())?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(ProxyError::transport)?;
        let (parts, body) = response.into_parts();
        let collected = body
            .collect()
            .await
            .map_err(|e| ProxyError::BodyRead { source: Box::new(e) })?;
        Ok(Response::from_parts(parts, full_body(collected.to_bytes())))
    }
}

#[async_trait]
impl HttpClient for UpstreamClient {
    async fn send(&self, request: Request<Full<Bytes>>) -> Result<Response<ResponseBody>, ProxyError> {
        // The timeout bounds the whole exchange, body included.
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.send_buffered(request))
                .await
                .map_err(|_| ProxyError::Timeout(timeout))?,
            None => self.send_buffered(request).await,
        }
    }
}

/// Client whose requests go through a running proxy instance.
#[derive(Clone)]
pub struct ProxiedClient {
    client: PooledClient,
    base_url: Url,
}

impl ProxiedClient {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            client: build_pooled_client(),
            base_url,
        }
    }

    /// The proxy's local URL; relative request paths resolve against it.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn get(&self, path: &str) -> Result<Response<Bytes>, ProxyError> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Full::new(Bytes::new()))
            .map_err(|e| ProxyError::InvalidRequest { source: Box::new(e) })?;
        self.send(request).await
    }

    pub async fn send(&self, mut request: Request<Full<Bytes>>) -> Result<Response<Bytes>, ProxyError> {
        // Absolute URIs are rewritten to the proxy too, keeping path and query.
        let relative: Uri = request
            .uri()
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
            .parse()
            .map_err(|e: axum::http::uri::InvalidUri| ProxyError::InvalidRequest {
                source: Box::new(e),
            })?;
        *request.uri_mut() = resolve_uri(&self.base_url, &relative)?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(ProxyError::transport)?;
        let (parts, body) = response.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| ProxyError::BodyRead { source: Box::new(e) })?
            .to_bytes();
        Ok(Response::from_parts(parts, bytes))
    }
}

impl std::fmt::Debug for ProxiedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxiedClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}
