//! `interpose run`: start a proxy in front of one external service.
//!
//! Resolves the config (explicit file, auto-detected `./interpose.*`, or
//! flags alone), applies flag overrides, starts the instance through a
//! [`ProxyRegistry`] and serves until Ctrl+C / SIGTERM, then stops it
//! gracefully.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::cache::ResponseCache;
use crate::cli::RunArgs;
use crate::config::sources::file_source;
use crate::config::validation::validate;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::logging;
use crate::registry::ProxyRegistry;
use crate::server;

pub async fn execute(args: RunArgs) -> Result<(), ProxyError> {
    let log_format = logging::resolve_format(args.pretty, args.json);
    logging::init(&args.log_level, log_format);

    #[cfg(feature = "sentry-integration")]
    let _sentry_guard = args
        .sentry_dsn
        .as_ref()
        .map(|dsn| crate::sentry_integration::init(dsn, args.sentry_environment.as_deref()));

    let mut config = resolve_config(&args).await?;
    args.apply_overrides(&mut config);
    if let Err(errors) = validate(&config) {
        return Err(ProxyError::ConfigValidation { errors });
    }

    let mut settings = config.into_settings()?;
    let cache = args.cache.then(ResponseCache::new);
    if let Some(ref cache) = cache {
        settings = cache.install(settings);
    }

    let registry = ProxyRegistry::new();
    let cancel = CancellationToken::new();

    let instance = tokio::select! {
        created = registry.get_or_create(settings, &cancel) => created?,
        () = server::shutdown_signal() => {
            cancel.cancel();
            tracing::info!("interpose stopped before the listener came up");
            return Ok(());
        }
    };

    tracing::info!(
        proxy_url = %instance.proxy_url(),
        external_url = %instance.settings().external_url,
        cache = cache.is_some(),
        "interpose started"
    );

    server::shutdown_signal().await;
    registry.stop_all().await;

    if let Some(cache) = cache {
        tracing::debug!(entries = cache.len(), "discarding response cache");
    }
    tracing::info!("interpose stopped");
    Ok(())
}

async fn resolve_config(args: &RunArgs) -> Result<ProxyConfig, ProxyError> {
    if let Some(ref path) = args.config {
        return file_source::load_file(path).await;
    }

    if let Some(path) = file_source::detect(Path::new(".")).await {
        tracing::info!(path = %path.display(), "auto-detected config file");
        return file_source::load_file(&path).await;
    }

    match args.external_url {
        Some(ref url) => Ok(ProxyConfig::new(url.as_str())),
        None => Err(ProxyError::NoConfigSource {
            hint: "Provide --config <file> or --external-url <url>.\n  \
                   Run 'interpose init' to create a config file."
                .into(),
        }),
    }
}
