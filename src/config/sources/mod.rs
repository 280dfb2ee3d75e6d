//! Config file discovery and format-specific parsing.
//!
//! [`parse_config_str`] deserializes by file extension (YAML, JSON, TOML,
//! each gated by its feature flag). The [`file_source`] submodule reads
//! files from disk and auto-detects `./interpose.*` in the working
//! directory.

pub mod file_source;

use crate::config::model::ProxyConfig;
use crate::error::ProxyError;

/// Parse a config string based on file extension.
pub fn parse_config_str(
    ext: &str,
    content: &str,
    path_display: &str,
) -> Result<ProxyConfig, ProxyError> {
    match ext {
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => serde_yml::from_str(content).map_err(|e| ProxyError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        #[cfg(feature = "json")]
        "json" => serde_json::from_str(content).map_err(|e| ProxyError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        #[cfg(feature = "toml")]
        "toml" => toml::from_str(content).map_err(|e| ProxyError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        other => Err(ProxyError::UnsupportedFormat(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "yaml")]
    #[test]
    fn parses_yaml_with_defaults() {
        let config = parse_config_str(
            "yml",
            "external_url: https://api.example.com\ntimeout: 3000\n",
            "interpose.yml",
        )
        .unwrap();
        assert_eq!(config.external_url, "https://api.example.com");
        assert_eq!(config.timeout, Some(3000));
        assert!(config.copy_headers_from_request);
        assert_eq!(config.internal_port, 0);
    }

    #[cfg(feature = "json")]
    #[test]
    fn parses_json() {
        let config = parse_config_str(
            "json",
            r#"{"external_url": "http://localhost:9000", "internal_port": 5001}"#,
            "interpose.json",
        )
        .unwrap();
        assert_eq!(config.internal_port, 5001);
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn unknown_fields_are_rejected() {
        let err = parse_config_str(
            "yaml",
            "external_url: https://api.example.com\nroutes: []\n",
            "interpose.yaml",
        )
        .unwrap_err();
        assert!(matches!(err, ProxyError::ConfigParse { .. }));
        assert!(err.to_string().contains("interpose.yaml"));
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = parse_config_str("ini", "", "interpose.ini").unwrap_err();
        assert!(matches!(err, ProxyError::UnsupportedFormat(ref ext) if ext == "ini"));
    }
}
