//! Command-line interface definitions using clap derive macros.
//!
//! Contains the top-level [`Cli`] parser, the [`Commands`] enum for
//! subcommands (run, init, validate), and their associated argument
//! structs. Proxy flags have environment variable equivalents for
//! container deployments and override values from the config file.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::ProxyConfig;

#[derive(Parser)]
#[command(
    name = "interpose",
    version,
    about = "Programmable single-target HTTP reverse proxy",
    propagate_version = true,
    after_help = "\x1b[1mQuick start:\x1b[0m\n  \
        interpose init                                  Create a starter config\n  \
        interpose run                                   Start with ./interpose.yaml\n  \
        interpose run --external-url https://api.example.com -p 5001"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a proxy in front of an external service
    Run(Box<RunArgs>),

    /// Generate a starter config file
    Init(InitArgs),

    /// Validate a config file without starting
    Validate(ValidateArgs),
}

#[derive(Args)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        interpose run                                          Auto-detect config\n  \
        interpose run -c interpose.yaml                        Specific config file\n  \
        interpose run --external-url http://localhost:9000     No config file\n  \
        interpose run -c interpose.yaml -p 8080 --cache        Cache repeated GETs")]
pub struct RunArgs {
    /// Config file path (.yaml, .json, .toml)
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// External service URL (overrides the config file)
    #[arg(short, long, env = "INTERPOSE_EXTERNAL_URL")]
    pub external_url: Option<String>,

    /// Listen port, 0 picks a free port (overrides the config file)
    #[arg(short, long, env = "INTERPOSE_PORT")]
    pub port: Option<u16>,

    /// Listen address (overrides the config file)
    #[arg(long, env = "INTERPOSE_HOST")]
    pub host: Option<IpAddr>,

    /// Serve repeated GET requests from memory
    #[arg(long, env = "INTERPOSE_CACHE")]
    pub cache: bool,

    // -- Logging --
    /// Log level
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Force pretty (human-readable) log output
    #[arg(long)]
    pub pretty: bool,

    /// Force JSON log output (overrides TTY detection)
    #[arg(long, conflicts_with = "pretty")]
    pub json: bool,

    // -- Observability --
    /// Sentry DSN (enables error tracking)
    #[cfg(feature = "sentry-integration")]
    #[arg(long, env = "SENTRY_DSN", help_heading = "Observability")]
    pub sentry_dsn: Option<String>,

    /// Sentry environment tag
    #[cfg(feature = "sentry-integration")]
    #[arg(long, env = "SENTRY_ENVIRONMENT", help_heading = "Observability")]
    pub sentry_environment: Option<String>,

    // -- Tuning --
    /// Upstream timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", help_heading = "Tuning")]
    pub timeout: Option<u64>,

    /// Max request body size in bytes
    #[arg(long, env = "MAX_BODY_SIZE", help_heading = "Tuning")]
    pub max_body: Option<usize>,
}

impl RunArgs {
    /// Overlay the flags that were given onto `config`.
    pub fn apply_overrides(&self, config: &mut ProxyConfig) {
        if let Some(ref url) = self.external_url {
            config.external_url.clone_from(url);
        }
        if let Some(port) = self.port {
            config.internal_port = port;
        }
        if let Some(host) = self.host {
            config.bind_address = host;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = Some(timeout);
        }
        if let Some(max_body) = self.max_body {
            config.max_request_body = max_body;
        }
    }
}

#[derive(Args)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        interpose init                                   Quick start config (yaml)\n  \
        interpose init --full                            Every option, documented\n  \
        interpose init -f toml -o proxy.toml             TOML format")]
pub struct InitArgs {
    /// Output format
    #[arg(short, long, default_value = "yaml")]
    pub format: ConfigFormat,

    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Include every option with documentation comments
    #[arg(long)]
    pub full: bool,

    /// External service URL to put in the generated file
    #[arg(long, default_value = "https://api.example.com")]
    pub external_url: String,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Config file to validate
    #[arg(default_value = "interpose.yaml")]
    pub config: PathBuf,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: ValidateFormat,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Toml => "toml",
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
pub enum ValidateFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_file_values() {
        let cli = Cli::parse_from([
            "interpose",
            "run",
            "--external-url",
            "http://localhost:9000",
            "-p",
            "5001",
            "--timeout",
            "250",
        ]);
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };

        let mut config = ProxyConfig {
            timeout: Some(10_000),
            ..ProxyConfig::new("https://api.example.com")
        };
        args.apply_overrides(&mut config);

        assert_eq!(config.external_url, "http://localhost:9000");
        assert_eq!(config.internal_port, 5001);
        assert_eq!(config.timeout, Some(250));
        assert!(config.bind_address.is_loopback());
    }
}
