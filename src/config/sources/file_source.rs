//! Async config file loading.
//!
//! [`load_file`] reads a file via Tokio, parses it by extension and
//! validates the result. [`detect`] looks for `interpose.{yaml,yml,json,toml}`
//! in a directory when no path is given.

use std::path::{Path, PathBuf};

use super::parse_config_str;
use crate::config::model::ProxyConfig;
use crate::config::validation::validate;
use crate::error::ProxyError;

pub const CANDIDATES: &[&str] = &[
    "interpose.yaml",
    "interpose.yml",
    "interpose.json",
    "interpose.toml",
];

async fn read_content(path: &Path) -> Result<String, ProxyError> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProxyError::ConfigFileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            ProxyError::Io(e)
        }
    })
}

/// Read, parse and validate the config file at `path`.
pub async fn load_file(path: &Path) -> Result<ProxyConfig, ProxyError> {
    let content = read_content(path).await?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let config = parse_config_str(ext, &content, &path.display().to_string())?;

    if let Err(errors) = validate(&config) {
        return Err(ProxyError::ConfigValidation { errors });
    }
    Ok(config)
}

/// First existing candidate file in `dir`, in [`CANDIDATES`] order.
pub async fn detect(dir: &Path) -> Option<PathBuf> {
    for name in CANDIDATES {
        let path = dir.join(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Some(path);
        }
    }
    None
}
