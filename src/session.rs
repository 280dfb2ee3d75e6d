//! Records describing one forwarded exchange.
//!
//! A [`RequestSession`] is created by the pipeline for every inbound
//! request and handed to the `on_request_started`, `get_cached_response`
//! and `on_request_finished` hooks. Once the cache or network stage has
//! run, it carries a [`ResponseData`] describing what the caller received.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use url::Url;

use crate::error::ProxyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// The response came from the external service.
    Upstream,
    /// The response was supplied by `get_cached_response`.
    Cache,
}

#[derive(Debug, Clone)]
pub struct ResponseData {
    pub request_id: String,
    pub response_id: String,
    pub response_time: DateTime<Utc>,
    pub status_code: u16,
    pub exception: Option<Arc<ProxyError>>,
    /// `None` means no body was produced.
    pub response_content: Option<Bytes>,
    pub response_headers: HeaderMap,
}

impl ResponseData {
    /// Empty record stamped now, with status 0 until something fills it in.
    #[must_use]
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            response_id: uuid::Uuid::new_v4().to_string(),
            response_time: Utc::now(),
            status_code: 0,
            exception: None,
            response_content: None,
            response_headers: HeaderMap::new(),
        }
    }

    /// A `200 OK` response carrying `content`, for use by cache and mock hooks.
    #[must_use]
    pub fn ok(content: impl Into<Bytes>) -> Self {
        Self {
            status_code: 200,
            response_content: Some(content.into()),
            ..Self::new(String::new())
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.response_headers.append(name, value);
        self
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status_code == 200 && self.exception.is_none()
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn content_text(&self) -> Option<Cow<'_, str>> {
        self.response_content
            .as_ref()
            .map(|bytes| String::from_utf8_lossy(bytes))
    }
}

#[derive(Debug, Clone)]
pub struct RequestSession {
    pub request_id: String,
    pub request_time: DateTime<Utc>,
    pub method: Method,
    pub request_url: Url,
    pub request_headers: HeaderMap,
    pub response_data: Option<ResponseData>,
    pub response_source: ResponseSource,
}

impl RequestSession {
    #[must_use]
    pub fn new(method: Method, request_url: Url, request_headers: HeaderMap) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            request_time: Utc::now(),
            method,
            request_url,
            request_headers,
            response_data: None,
            response_source: ResponseSource::Upstream,
        }
    }

    /// Time between the request and its response; zero if either side is
    /// missing or the wall clock went backwards.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.response_data
            .as_ref()
            .and_then(|data| (data.response_time - self.request_time).to_std().ok())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.response_data.as_ref().is_some_and(ResponseData::is_ok)
    }

    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.response_data.as_ref().map(|data| data.status_code)
    }

    #[must_use]
    pub fn exception(&self) -> Option<&ProxyError> {
        self.response_data
            .as_ref()
            .and_then(|data| data.exception.as_deref())
    }

    /// Record `error` on the response, creating a 500 record if absent.
    pub fn fail(&mut self, error: ProxyError) {
        let request_id = &self.request_id;
        let data = self.response_data.get_or_insert_with(|| ResponseData {
            status_code: 500,
            ..ResponseData::new(request_id.clone())
        });
        data.response_time = Utc::now();
        data.exception = Some(Arc::new(error));
    }
}

impl fmt::Display for RequestSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} -> {}",
            self.request_time.format("%Y-%m-%dT%H:%M:%S"),
            self.method,
            self.request_url,
            self.status_code().unwrap_or(0)
        )
    }
}
