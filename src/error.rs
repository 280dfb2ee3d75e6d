//! Unified error types for interpose.
//!
//! Defines [`ProxyError`] (the main crate error enum), [`ValidationError`]
//! for config validation failures, and [`HookError`], the boxed error type
//! returned by caller-supplied hooks. Error messages include contextual
//! hints to guide the user toward a fix.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Error returned by a settings hook. Never propagated past the pipeline.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "  {}: {}", self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

fn format_errors(errors: &[ValidationError]) -> String {
    use std::fmt::Write;
    let mut buf = String::new();
    for (i, e) in errors.iter().enumerate() {
        if i > 0 {
            buf.push('\n');
        }
        // write! to String is infallible (only fails on OOM which is unrecoverable)
        let _ = write!(buf, "{e}");
    }
    buf
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("No config source found.\n\n  {hint}")]
    NoConfigSource { hint: String },

    #[error("Config file not found: {}", path.display())]
    ConfigFileNotFound { path: PathBuf },

    #[error("Config parse error in {path}:\n  {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Config validation failed:\n{}", format_errors(.errors))]
    ConfigValidation { errors: Vec<ValidationError> },

    #[error("Unsupported config format: '{0}'")]
    UnsupportedFormat(String),

    #[error("Invalid address: {0}")]
    AddressParse(#[from] std::net::AddrParseError),

    #[error("Invalid external URL '{url}': {reason}")]
    InvalidExternalUrl { url: String, reason: String },

    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Failed to start listener on {addr}: {source}")]
    Creation {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Proxy creation was cancelled")]
    Cancelled,

    #[error("Proxy creation task failed: {0}")]
    CreationAborted(String),

    #[error("HTTP client initialization failed: {source}")]
    ClientInit {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid outbound request: {source}")]
    InvalidRequest {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("HTTP request failed: {source}")]
    Transport {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("HTTP request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Failed to read response body: {source}")]
    BodyRead {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Failed to read request body: {source}")]
    RequestBody {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid response status code: {0}")]
    InvalidStatus(u16),

    #[error("File already exists: {}", path.display())]
    FileExists { path: PathBuf },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// An error shared between every caller waiting on the same proxy creation.
    #[error(transparent)]
    Shared(#[from] std::sync::Arc<ProxyError>),
}

impl ProxyError {
    /// Wrap any error as a [`ProxyError::Transport`].
    pub fn transport(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Transport {
            source: source.into(),
        }
    }

    /// Wrap any error as a [`ProxyError::ClientInit`].
    pub fn client_init(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::ClientInit {
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_listed_one_per_line() {
        let err = ProxyError::ConfigValidation {
            errors: vec![
                ValidationError {
                    field: "external_url".into(),
                    message: "must be absolute".into(),
                    suggestion: Some("did you mean 'https://api.example.com'?".into()),
                },
                ValidationError {
                    field: "timeout".into(),
                    message: "must be greater than 0".into(),
                    suggestion: None,
                },
            ],
        };

        let text = err.to_string();
        assert!(text.contains("external_url: must be absolute (did you mean"));
        assert!(text.ends_with("  timeout: must be greater than 0"));
    }

    #[test]
    fn timeout_reports_milliseconds() {
        let err = ProxyError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "HTTP request timed out after 1500ms");
    }
}
