//! Serde data structures for the interpose configuration file.
//!
//! [`ProxyConfig`] is the file-level view of [`ProxySettings`]: plain data
//! only, hooks are wired in code. All fields except `external_url` are
//! optional and `deny_unknown_fields` rejects typos.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProxyError;
use crate::settings::{ProxySettings, DEFAULT_MAX_REQUEST_BODY};

const fn default_true() -> bool {
    true
}

const fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

const fn default_max_request_body() -> usize {
    DEFAULT_MAX_REQUEST_BODY
}

fn is_true(v: &bool) -> bool {
    *v
}

fn is_zero(v: &u16) -> bool {
    *v == 0
}

fn is_default_bind_address(v: &IpAddr) -> bool {
    *v == default_bind_address()
}

fn is_default_max_request_body(v: &usize) -> bool {
    *v == default_max_request_body()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    pub external_url: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub internal_port: u16,

    #[serde(
        default = "default_bind_address",
        skip_serializing_if = "is_default_bind_address"
    )]
    pub bind_address: IpAddr,

    /// Upstream timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub copy_headers_from_request: bool,

    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub copy_headers_from_response: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_headers_no_copy: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_headers_no_copy: Vec<String>,

    #[serde(
        default = "default_max_request_body",
        skip_serializing_if = "is_default_max_request_body"
    )]
    pub max_request_body: usize,
}

impl ProxyConfig {
    #[must_use]
    pub fn new(external_url: impl Into<String>) -> Self {
        Self {
            external_url: external_url.into(),
            internal_port: 0,
            bind_address: default_bind_address(),
            timeout: None,
            copy_headers_from_request: true,
            copy_headers_from_response: true,
            request_headers_no_copy: Vec::new(),
            response_headers_no_copy: Vec::new(),
            max_request_body: default_max_request_body(),
        }
    }

    /// Convert into runtime settings. Empty exclusion lists become `None`.
    pub fn into_settings(self) -> Result<ProxySettings, ProxyError> {
        let mut settings = ProxySettings::new(&self.external_url)?
            .with_internal_port(self.internal_port)
            .with_bind_address(self.bind_address)
            .with_copy_headers_from_request(self.copy_headers_from_request)
            .with_copy_headers_from_response(self.copy_headers_from_response)
            .with_max_request_body(self.max_request_body);

        if let Some(ms) = self.timeout {
            settings = settings.with_timeout(Duration::from_millis(ms));
        }
        if !self.request_headers_no_copy.is_empty() {
            settings = settings.with_request_headers_no_copy(self.request_headers_no_copy);
        }
        if !self.response_headers_no_copy.is_empty() {
            settings = settings.with_response_headers_no_copy(self.response_headers_no_copy);
        }
        Ok(settings)
    }
}
