//! In-memory response cache for repeated `GET` requests.
//!
//! [`ResponseCache`] plugs into a proxy through its hooks: once
//! [`installed`](ResponseCache::install), successful upstream `GET`
//! responses are recorded by `on_request_finished` and replayed by
//! `get_cached_response`. Hooks already present on the settings still run.
//!
//! The cache holds at most [`DEFAULT_CAPACITY`] distinct requests unless
//! built with [`ResponseCache::with_capacity`]. Once full, responses for
//! new requests are not recorded; entries already held keep refreshing.

use std::sync::Arc;

use axum::http::Method;
use dashmap::DashMap;

use crate::session::{RequestSession, ResponseData, ResponseSource};
use crate::settings::ProxySettings;

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct ResponseCache {
    entries: Arc<DashMap<String, ResponseData>>,
    capacity: usize,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ResponseCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            capacity,
        }
    }

    fn key(session: &RequestSession) -> String {
        format!("{} {}", session.method, session.request_url)
    }

    #[must_use]
    pub fn lookup(&self, session: &RequestSession) -> Option<ResponseData> {
        self.entries
            .get(&Self::key(session))
            .map(|entry| entry.value().clone())
    }

    /// Record the session's response if it is an ok upstream `GET`.
    pub fn record(&self, session: &RequestSession) {
        if session.method != Method::GET || session.response_source != ResponseSource::Upstream {
            return;
        }
        let Some(data) = session.response_data.as_ref().filter(|d| d.is_ok()) else {
            return;
        };
        let key = Self::key(session);
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            tracing::debug!(url = %session.request_url, capacity = self.capacity, "cache full, not recording");
            return;
        }
        tracing::debug!(url = %session.request_url, "caching response");
        self.entries.insert(key, data.clone());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Wire this cache into `settings`, keeping any hooks already set.
    #[must_use]
    pub fn install(&self, settings: ProxySettings) -> ProxySettings {
        let previous_lookup = settings.get_cached_response.clone();
        let previous_finished = settings.on_request_finished.clone();

        let lookup_cache = self.clone();
        let record_cache = self.clone();

        settings
            .with_get_cached_response(move |session| {
                if let Some(lookup) = previous_lookup.as_deref() {
                    if let Some(data) = lookup(session)? {
                        return Ok(Some(data));
                    }
                }
                Ok(lookup_cache.lookup(session))
            })
            .with_on_request_finished(move |session| {
                record_cache.record(session);
                match previous_finished.as_deref() {
                    Some(finished) => finished(session),
                    None => Ok(()),
                }
            })
    }
}
