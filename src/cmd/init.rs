//! `interpose init`: generate a starter configuration file.
//!
//! The minimal file is the serialized default [`ProxyConfig`] for the
//! given external URL. `--full` writes a commented template listing
//! every option with its default.

use std::path::PathBuf;

use crate::cli::{ConfigFormat, InitArgs};
use crate::config::validation::validate_external_url;
use crate::config::ProxyConfig;
use crate::error::{ProxyError, ValidationError};

pub fn execute(args: &InitArgs) -> Result<(), ProxyError> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("interpose.{}", args.format.extension())));

    if output.exists() {
        return Err(ProxyError::FileExists { path: output });
    }

    if let Err(message) = validate_external_url(&args.external_url) {
        return Err(ProxyError::ConfigValidation {
            errors: vec![ValidationError {
                field: "external_url".into(),
                message,
                suggestion: None,
            }],
        });
    }

    let content = render(args)?;
    std::fs::write(&output, content)?;
    println!("Created {}", output.display());
    Ok(())
}

fn render(args: &InitArgs) -> Result<String, ProxyError> {
    if !args.full {
        return serialize_config(&ProxyConfig::new(args.external_url.as_str()), &args.format);
    }

    let template = match args.format {
        ConfigFormat::Yaml => YAML_FULL,
        ConfigFormat::Json => JSON_FULL,
        ConfigFormat::Toml => TOML_FULL,
    };
    Ok(template.replace("{external_url}", &args.external_url))
}

/// Serialize a [`ProxyConfig`] in the given format.
pub fn serialize_config(config: &ProxyConfig, format: &ConfigFormat) -> Result<String, ProxyError> {
    match format {
        #[cfg(feature = "yaml")]
        ConfigFormat::Yaml => serde_yml::to_string(config)
            .map_err(|e| ProxyError::Io(std::io::Error::other(e.to_string()))),

        #[cfg(not(feature = "yaml"))]
        ConfigFormat::Yaml => Err(ProxyError::UnsupportedFormat("yaml".into())),

        ConfigFormat::Json => serde_json::to_string_pretty(config)
            .map(|mut s| {
                s.push('\n');
                s
            })
            .map_err(|e| ProxyError::Io(std::io::Error::other(e.to_string()))),

        #[cfg(feature = "toml")]
        ConfigFormat::Toml => toml::to_string_pretty(config)
            .map_err(|e| ProxyError::Io(std::io::Error::other(e.to_string()))),

        #[cfg(not(feature = "toml"))]
        ConfigFormat::Toml => Err(ProxyError::UnsupportedFormat("toml".into())),
    }
}

const YAML_FULL: &str = r#"# interpose config
#
# All values shown except external_url are defaults.

# Service every request is forwarded to. Inbound path and query are
# appended to its origin.
external_url: "{external_url}"

# Port to listen on. 0 picks a free port.
# internal_port: 0
# bind_address: "127.0.0.1"

# Upstream timeout in milliseconds. Unset waits indefinitely.
# timeout: 30000

# Copy headers between caller and external service.
# copy_headers_from_request: true
# copy_headers_from_response: true

# Header names never copied (case-insensitive).
# request_headers_no_copy: ["Authorization", "Cookie"]
# response_headers_no_copy: ["Set-Cookie"]

# Largest accepted request body in bytes.
# max_request_body: 10485760
"#;

const JSON_FULL: &str = r#"{
  "external_url": "{external_url}",
  "internal_port": 0,
  "bind_address": "127.0.0.1",
  "timeout": 30000,
  "copy_headers_from_request": true,
  "copy_headers_from_response": true,
  "request_headers_no_copy": [],
  "response_headers_no_copy": [],
  "max_request_body": 10485760
}
"#;

const TOML_FULL: &str = r#"# interpose config
#
# All values shown except external_url are defaults.

# Service every request is forwarded to.
external_url = "{external_url}"

# internal_port = 0
# bind_address = "127.0.0.1"

# Upstream timeout in milliseconds. Unset waits indefinitely.
# timeout = 30000

# copy_headers_from_request = true
# copy_headers_from_response = true
# request_headers_no_copy = ["Authorization", "Cookie"]
# response_headers_no_copy = ["Set-Cookie"]

# max_request_body = 10485760
"#;
