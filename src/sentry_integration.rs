//! Optional Sentry error tracking integration.
//!
//! The returned guard must be held for the lifetime of the process so
//! buffered events are flushed on exit. Events reach Sentry through the
//! `sentry-tracing` layer installed by [`logging::init`](crate::logging::init).

pub fn init(dsn: &str, environment: Option<&str>) -> sentry::ClientInitGuard {
    let parsed_dsn = match dsn.parse() {
        Ok(d) => Some(d),
        Err(e) => {
            tracing::warn!(error = %e, "invalid Sentry DSN, error tracking disabled");
            None
        }
    };

    sentry::init(sentry::ClientOptions {
        dsn: parsed_dsn,
        environment: environment.map(|e| e.to_string().into()),
        release: Some(concat!("interpose@", env!("CARGO_PKG_VERSION")).into()),
        attach_stacktrace: true,
        ..Default::default()
    })
}
