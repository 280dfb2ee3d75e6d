//! Configuration loading and validation.
//!
//! A config file describes one proxy instance as a [`ProxyConfig`]. The
//! [`sources`] module finds and parses files, [`validation`] reports
//! every problem at once, and [`ProxyConfig::into_settings`] turns the
//! result into runtime [`ProxySettings`](crate::settings::ProxySettings).

pub mod model;
pub mod sources;
pub mod validation;

pub use model::ProxyConfig;
