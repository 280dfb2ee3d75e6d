//! Runtime settings for one proxy instance.
//!
//! [`ProxySettings`] is an immutable value: builder methods consume and
//! return it, and the registry derives resolved copies (actual port,
//! proxy URL) with [`ProxySettings::with_resolved_addr`] instead of
//! mutating the caller's value. Hooks are optional capabilities checked at
//! each call site.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::http::request::Parts;
use url::Url;

use crate::error::{HookError, ProxyError};
use crate::proxy::client::HttpClient;
use crate::session::{RequestSession, ResponseData};

pub const DEFAULT_MAX_REQUEST_BODY: usize = 10 * 1024 * 1024;

pub type GetRequestUrl = dyn Fn(&ProxySettings, &Parts) -> Result<Url, ProxyError> + Send + Sync;
pub type CreateHttpClient =
    dyn Fn(&ProxySettings) -> Result<Arc<dyn HttpClient>, ProxyError> + Send + Sync;
pub type InitializeHttpClient = dyn Fn(Arc<dyn HttpClient>, &ProxySettings) -> Result<Arc<dyn HttpClient>, ProxyError>
    + Send
    + Sync;
pub type SessionHook = dyn Fn(&RequestSession) -> Result<(), HookError> + Send + Sync;
pub type GetCachedResponse =
    dyn Fn(&RequestSession) -> Result<Option<ResponseData>, HookError> + Send + Sync;

/// Identity of a proxy instance: normalized external URL plus the port the
/// caller asked for (before `0` is replaced by an assigned port).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey(String);

impl InstanceKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone)]
pub struct ProxySettings {
    pub external_url: Url,
    pub internal_port: u16,
    pub bind_address: IpAddr,
    pub proxy_url: Option<Url>,
    pub timeout: Option<Duration>,
    pub copy_headers_from_request: bool,
    pub copy_headers_from_response: bool,
    pub request_headers_no_copy: Option<Vec<String>>,
    pub response_headers_no_copy: Option<Vec<String>>,
    pub max_request_body: usize,
    pub get_request_url: Option<Arc<GetRequestUrl>>,
    pub create_http_client: Option<Arc<CreateHttpClient>>,
    pub initialize_http_client: Option<Arc<InitializeHttpClient>>,
    pub on_request_started: Option<Arc<SessionHook>>,
    pub on_request_finished: Option<Arc<SessionHook>>,
    pub get_cached_response: Option<Arc<GetCachedResponse>>,
}

impl ProxySettings {
    /// Settings for `external_url` with every option at its default.
    ///
    /// Only absolute `http`/`https` URLs are accepted.
    pub fn new(external_url: &str) -> Result<Self, ProxyError> {
        let url = Url::parse(external_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ProxyError::InvalidExternalUrl {
                url: external_url.to_string(),
                reason: format!("unsupported scheme '{}' (expected http or https)", url.scheme()),
            });
        }
        if url.host_str().is_none() {
            return Err(ProxyError::InvalidExternalUrl {
                url: external_url.to_string(),
                reason: "missing host".into(),
            });
        }
        Ok(Self::from_url(url))
    }

    #[must_use]
    pub fn from_url(external_url: Url) -> Self {
        Self {
            external_url,
            internal_port: 0,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            proxy_url: None,
            timeout: None,
            copy_headers_from_request: true,
            copy_headers_from_response: true,
            request_headers_no_copy: None,
            response_headers_no_copy: None,
            max_request_body: DEFAULT_MAX_REQUEST_BODY,
            get_request_url: None,
            create_http_client: None,
            initialize_http_client: None,
            on_request_started: None,
            on_request_finished: None,
            get_cached_response: None,
        }
    }

    #[must_use]
    pub fn key(&self) -> InstanceKey {
        InstanceKey(format!("{};{}", self.external_url, self.internal_port))
    }

    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.internal_port)
    }

    /// Copy with `internal_port` and `proxy_url` filled from the bound address.
    pub fn with_resolved_addr(&self, addr: SocketAddr) -> Result<Self, ProxyError> {
        Ok(Self {
            internal_port: addr.port(),
            proxy_url: Some(local_proxy_url(addr)?),
            ..self.clone()
        })
    }

    #[must_use]
    pub fn with_internal_port(mut self, port: u16) -> Self {
        self.internal_port = port;
        self
    }

    #[must_use]
    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_copy_headers_from_request(mut self, enabled: bool) -> Self {
        self.copy_headers_from_request = enabled;
        self
    }

    #[must_use]
    pub fn with_copy_headers_from_response(mut self, enabled: bool) -> Self {
        self.copy_headers_from_response = enabled;
        self
    }

    #[must_use]
    pub fn with_request_headers_no_copy<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request_headers_no_copy = Some(names.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_response_headers_no_copy<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.response_headers_no_copy = Some(names.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_max_request_body(mut self, bytes: usize) -> Self {
        self.max_request_body = bytes;
        self
    }

    #[must_use]
    pub fn with_get_request_url(
        mut self,
        hook: impl Fn(&ProxySettings, &Parts) -> Result<Url, ProxyError> + Send + Sync + 'static,
    ) -> Self {
        self.get_request_url = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn with_create_http_client(
        mut self,
        hook: impl Fn(&ProxySettings) -> Result<Arc<dyn HttpClient>, ProxyError> + Send + Sync + 'static,
    ) -> Self {
        self.create_http_client = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn with_initialize_http_client(
        mut self,
        hook: impl Fn(Arc<dyn HttpClient>, &ProxySettings) -> Result<Arc<dyn HttpClient>, ProxyError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.initialize_http_client = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn with_on_request_started(
        mut self,
        hook: impl Fn(&RequestSession) -> Result<(), HookError> + Send + Sync + 'static,
    ) -> Self {
        self.on_request_started = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn with_on_request_finished(
        mut self,
        hook: impl Fn(&RequestSession) -> Result<(), HookError> + Send + Sync + 'static,
    ) -> Self {
        self.on_request_finished = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn with_get_cached_response(
        mut self,
        hook: impl Fn(&RequestSession) -> Result<Option<ResponseData>, HookError> + Send + Sync + 'static,
    ) -> Self {
        self.get_cached_response = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySettings")
            .field("external_url", &self.external_url.as_str())
            .field("internal_port", &self.internal_port)
            .field("bind_address", &self.bind_address)
            .field("proxy_url", &self.proxy_url.as_ref().map(Url::as_str))
            .field("timeout", &self.timeout)
            .field("copy_headers_from_request", &self.copy_headers_from_request)
            .field("copy_headers_from_response", &self.copy_headers_from_response)
            .field("request_headers_no_copy", &self.request_headers_no_copy)
            .field("response_headers_no_copy", &self.response_headers_no_copy)
            .field("max_request_body", &self.max_request_body)
            .field("get_request_url", &self.get_request_url.is_some())
            .field("create_http_client", &self.create_http_client.is_some())
            .field("initialize_http_client", &self.initialize_http_client.is_some())
            .field("on_request_started", &self.on_request_started.is_some())
            .field("on_request_finished", &self.on_request_finished.is_some())
            .field("get_cached_response", &self.get_cached_response.is_some())
            .finish()
    }
}

/// Address callers use to reach a listener bound on `addr`.
pub(crate) fn local_proxy_url(addr: SocketAddr) -> Result<Url, ProxyError> {
    let host = if addr.ip().is_unspecified() {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        addr.ip()
    };
    Ok(Url::parse(&format!("http://{}/", SocketAddr::new(host, addr.port())))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_uses_normalized_url_and_requested_port() {
        let a = ProxySettings::new("HTTPS://API.Example.com").unwrap();
        let b = ProxySettings::new("https://api.example.com:443/").unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().as_str(), "https://api.example.com/;0");

        let c = b.clone().with_internal_port(5001);
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn resolving_port_does_not_touch_original() {
        let original = ProxySettings::new("https://api.example.com").unwrap();
        let resolved = original
            .with_resolved_addr("127.0.0.1:40123".parse().unwrap())
            .unwrap();

        assert_eq!(original.internal_port, 0);
        assert!(original.proxy_url.is_none());
        assert_eq!(resolved.internal_port, 40123);
        assert_eq!(
            resolved.proxy_url.as_ref().map(Url::as_str),
            Some("http://127.0.0.1:40123/")
        );
    }

    #[test]
    fn unspecified_bind_address_resolves_to_loopback_url() {
        let settings = ProxySettings::new("http://upstream")
            .unwrap()
            .with_bind_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let resolved = settings
            .with_resolved_addr("0.0.0.0:8080".parse().unwrap())
            .unwrap();
        assert_eq!(
            resolved.proxy_url.as_ref().map(Url::as_str),
            Some("http://127.0.0.1:8080/")
        );
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(matches!(
            ProxySettings::new("ftp://files.example.com"),
            Err(ProxyError::InvalidExternalUrl { .. })
        ));
        assert!(matches!(
            ProxySettings::new("/relative/path"),
            Err(ProxyError::UrlParse(_))
        ));
    }

    #[test]
    fn header_copy_defaults_to_enabled() {
        let settings = ProxySettings::new("https://api.example.com").unwrap();
        assert!(settings.copy_headers_from_request);
        assert!(settings.copy_headers_from_response);
        assert!(settings.request_headers_no_copy.is_none());
        assert_eq!(settings.max_request_body, DEFAULT_MAX_REQUEST_BODY);
    }
}
