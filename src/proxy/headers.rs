//! Header copy policy, `Host` rewriting, and hop-by-hop stripping.
//!
//! [`should_copy`] decides for a single header name whether it crosses
//! the proxy boundary. [`build_forwarded_headers`] applies it to the
//! inbound request and points `Host` at the external service;
//! [`build_response_headers`] applies it to an upstream or cached
//! response and removes framing headers the re-buffered body no longer
//! matches.

use std::sync::LazyLock;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::settings::ProxySettings;

static HOP_BY_HOP: LazyLock<Vec<HeaderName>> = LazyLock::new(|| {
    [
        "connection",
        "keep-alive",
        "transfer-encoding",
        "te",
        "trailer",
        "upgrade",
        "proxy-authorization",
        "proxy-authenticate",
    ]
    .iter()
    .filter_map(|name| name.parse::<HeaderName>().ok())
    .collect()
});

/// Whether `name` may be copied, given the direction's switch and exclusions.
///
/// Exclusions match case-insensitively.
#[must_use]
pub fn should_copy(name: &str, copy_enabled: bool, exclusions: Option<&[String]>) -> bool {
    if !copy_enabled {
        return false;
    }
    !exclusions.is_some_and(|list| list.iter().any(|excluded| excluded.eq_ignore_ascii_case(name)))
}

/// Strip hop-by-hop headers and `content-length` from a response.
///
/// The body has already been fully collected by the pipeline, so
/// `transfer-encoding` and `content-length` from the origin are no longer
/// accurate. Axum will set the correct `content-length` based on the actual
/// body bytes.
pub fn strip_response_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove(hyper::header::CONTENT_LENGTH);
}

/// Headers to send upstream for an inbound request.
pub fn build_forwarded_headers(original: &HeaderMap, settings: &ProxySettings) -> HeaderMap {
    let exclusions = settings.request_headers_no_copy.as_deref();
    let mut headers = HeaderMap::new();

    for (name, value) in original {
        if HOP_BY_HOP.contains(name) || *name == hyper::header::HOST {
            continue;
        }
        if should_copy(name.as_str(), settings.copy_headers_from_request, exclusions) {
            headers.append(name.clone(), value.clone());
        }
    }

    // Rewrite Host
    if let Some(host) = settings.external_url.host_str() {
        let host_value = settings
            .external_url
            .port()
            .map_or_else(|| host.to_string(), |port| format!("{host}:{port}"));
        if let Ok(val) = HeaderValue::from_str(&host_value) {
            headers.insert(hyper::header::HOST, val);
        }
    }

    headers
}

/// Headers to return to the caller for an upstream or cached response.
pub fn build_response_headers(original: &HeaderMap, settings: &ProxySettings) -> HeaderMap {
    let exclusions = settings.response_headers_no_copy.as_deref();
    let mut headers = HeaderMap::new();

    for (name, value) in original {
        if should_copy(name.as_str(), settings.copy_headers_from_response, exclusions) {
            headers.append(name.clone(), value.clone());
        }
    }

    strip_response_hop_by_hop(&mut headers);
    headers
}
