//! `interpose validate`: check a configuration file without starting a proxy.
//!
//! A valid file prints the effective proxy (target, listen address, timeout
//! and header policy per direction); an invalid one lists every problem.
//! Both outcomes are available as text or as a single JSON document.

use serde_json::{json, Value};

use crate::cli::{ValidateArgs, ValidateFormat};
use crate::config::sources::parse_config_str;
use crate::config::{validation, ProxyConfig};
use crate::error::{ProxyError, ValidationError};

pub fn execute(args: &ValidateArgs) -> Result<(), ProxyError> {
    let path = &args.config;
    if !path.exists() {
        return Err(ProxyError::ConfigFileNotFound { path: path.clone() });
    }

    let label = path.display().to_string();
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let config = parse_config_str(ext, &std::fs::read_to_string(path)?, &label)?;

    match (validation::validate(&config), &args.format) {
        (Ok(()), ValidateFormat::Text) => {
            println!("\u{2713} {}", validation::format_validation_report(&label, &config));
        }
        (Ok(()), ValidateFormat::Json) => println!("{}", proxy_summary(&config)),
        (Err(errors), format) => {
            match format {
                ValidateFormat::Text => {
                    eprintln!("\u{2717} {label} has {} errors\n", errors.len());
                    for error in &errors {
                        eprintln!("{error}");
                    }
                }
                ValidateFormat::Json => println!("{}", error_report(&errors)),
            }
            return Err(ProxyError::ConfigValidation { errors });
        }
    }
    Ok(())
}

/// The proxy a valid config would start, as JSON.
fn proxy_summary(config: &ProxyConfig) -> Value {
    let direction = |copy: bool, exclusions: &[String]| {
        json!({
            "copy": copy,
            "exclude": if copy { exclusions.to_vec() } else { Vec::new() },
        })
    };

    json!({
        "valid": true,
        "proxy": {
            "external_url": config.external_url,
            "listen": format!("{}:{}", config.bind_address, config.internal_port),
            "timeout_ms": config.timeout,
            "max_request_body": config.max_request_body,
            "headers": {
                "request": direction(config.copy_headers_from_request, &config.request_headers_no_copy),
                "response": direction(config.copy_headers_from_response, &config.response_headers_no_copy),
            },
        },
    })
}

fn error_report(errors: &[ValidationError]) -> Value {
    let errors: Vec<Value> = errors
        .iter()
        .map(|e| json!({ "field": e.field, "message": e.message, "suggestion": e.suggestion }))
        .collect();
    json!({ "valid": false, "errors": errors })
}
