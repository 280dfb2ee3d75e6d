//! interpose is a programmable single-target HTTP reverse proxy.
//!
//! A proxy instance listens on a local port and forwards every request to
//! one external service, recording each exchange as a
//! [`RequestSession`](session::RequestSession). Callers customize the
//! pipeline through hooks on [`ProxySettings`](settings::ProxySettings):
//! rewrite the upstream URL, swap the HTTP client, observe requests, or
//! short-circuit them with a cached response. A [`ProxyRegistry`](registry::ProxyRegistry)
//! guarantees one instance per external URL and port.
//!
//! # Architecture
//!
//! - [`cache`] -- In-memory response cache wired in through the hooks.
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (run, init, validate).
//! - [`config`] -- Config file model, loading, and validation.
//! - [`error`] -- Unified error types using `thiserror`.
//! - [`instance`] -- A running proxy: listener, resolved settings, stop.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//! - [`proxy`] -- Forwarding pipeline, header policy, and HTTP client seam.
//! - [`registry`] -- One instance per key, with shared creation.
//! - [`server`] -- Axum router, listener lifecycle, and graceful shutdown.
//! - [`session`] -- Request/response records handed to hooks.
//! - [`settings`] -- Per-instance settings and hook types.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), interpose::error::ProxyError> {
//! use interpose::registry::ProxyRegistry;
//! use interpose::settings::ProxySettings;
//! use tokio_util::sync::CancellationToken;
//!
//! let registry = ProxyRegistry::new();
//! let settings = ProxySettings::new("https://api.example.com")?
//!     .with_on_request_finished(|session| {
//!         println!("{session}");
//!         Ok(())
//!     });
//!
//! let proxy = registry.get_or_create(settings, &CancellationToken::new()).await?;
//! let response = proxy.client().get("/rates?base=USD").await?;
//! println!("{}", response.status());
//! proxy.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML config file support _(enabled by default)_ |
//! | `json` | JSON config file support |
//! | `toml` | TOML config file support |
//! | `sentry-integration` | Sentry error tracking |
//! | `file-backends` | All file format backends |
//! | `full` | All features |

#![allow(clippy::missing_errors_doc)]

pub mod cache;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod instance;
pub mod logging;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod session;
pub mod settings;

#[cfg(feature = "sentry-integration")]
pub mod sentry_integration;
