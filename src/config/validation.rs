//! Configuration validation with detailed error reporting.
//!
//! [`validate`] checks a parsed [`ProxyConfig`] for problems serde cannot
//! catch: a relative or non-HTTP external URL, a zero timeout or body
//! limit, and header names that are not valid HTTP tokens. Every problem
//! is collected so the user sees them all at once.

use axum::http::HeaderName;
use url::Url;

use super::model::ProxyConfig;
use crate::error::ValidationError;

/// Validate the external URL. Returns `Ok(())` or a human-readable error.
pub fn validate_external_url(url: &str) -> Result<(), String> {
    if url.is_empty() {
        return Err("external_url cannot be empty".into());
    }
    match Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            if scheme != "http" && scheme != "https" {
                Err(format!(
                    "unsupported scheme '{scheme}' (expected http or https)"
                ))
            } else if parsed.host_str().is_none() {
                Err(format!("'{url}' has no host"))
            } else {
                Ok(())
            }
        }
        Err(_) => Err(format!("'{url}' is not an absolute URL")),
    }
}

/// Validate a header name. Returns `Ok(())` or a human-readable error.
pub fn validate_header_name(name: &str) -> Result<(), String> {
    HeaderName::from_bytes(name.as_bytes())
        .map(|_| ())
        .map_err(|_| format!("'{name}' is not a valid header name"))
}

pub fn validate(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(msg) = validate_external_url(&config.external_url) {
        let suggestion = (!config.external_url.is_empty() && !config.external_url.contains("://"))
            .then(|| format!("did you mean 'https://{}'?", config.external_url));
        errors.push(ValidationError {
            field: "external_url".into(),
            message: msg,
            suggestion,
        });
    }

    if config.timeout == Some(0) {
        errors.push(ValidationError {
            field: "timeout".into(),
            message: "timeout must be greater than 0".into(),
            suggestion: Some("omit the field to wait indefinitely".into()),
        });
    }

    if config.max_request_body == 0 {
        errors.push(ValidationError {
            field: "max_request_body".into(),
            message: "max_request_body must be greater than 0".into(),
            suggestion: None,
        });
    }

    for (field, names) in [
        ("request_headers_no_copy", &config.request_headers_no_copy),
        ("response_headers_no_copy", &config.response_headers_no_copy),
    ] {
        for name in names {
            if let Err(msg) = validate_header_name(name) {
                errors.push(ValidationError {
                    field: field.into(),
                    message: msg,
                    suggestion: None,
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[must_use]
pub fn format_validation_report(path: &str, config: &ProxyConfig) -> String {
    let timeout = config
        .timeout
        .map_or_else(|| "none".to_string(), |t| format!("{t}ms"));
    let port = if config.internal_port == 0 {
        "any free port".to_string()
    } else {
        config.internal_port.to_string()
    };
    let exclusions = |names: &[String]| {
        if names.is_empty() {
            "none".to_string()
        } else {
            names.join(", ")
        }
    };

    let lines = [
        format!("  external_url: {}", config.external_url),
        format!("  listen:       {}:{}", config.bind_address, port),
        format!("  timeout:      {timeout}"),
        format!(
            "  headers:      request {}, response {}",
            on_off(config.copy_headers_from_request),
            on_off(config.copy_headers_from_response)
        ),
        format!("  no-copy req:  {}", exclusions(&config.request_headers_no_copy)),
        format!("  no-copy resp: {}", exclusions(&config.response_headers_no_copy)),
    ];

    format!("{} is valid\n{}", path, lines.join("\n"))
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "copied"
    } else {
        "dropped"
    }
}
