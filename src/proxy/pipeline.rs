//! Per-request forwarding pipeline.
//!
//! [`handle`] turns one inbound request into one [`RequestSession`]:
//! it resolves the outbound client and upstream URL, applies the request
//! header policy, fires `on_request_started`, reads the inbound body up to
//! `max_request_body`, consults `get_cached_response`, otherwise calls the
//! external service, and finally fires `on_request_finished`.
//!
//! Nothing raised inside the pipeline escapes it. Hook errors and panics
//! are logged and ignored; client, transport and body errors are recorded
//! on the session and the caller receives a bare `500` (`413` when the
//! inbound body is over the limit).

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use url::Url;
use uuid::Uuid;

use super::client::{HttpClient, UpstreamClient};
use super::headers::{build_forwarded_headers, build_response_headers};
use crate::error::ProxyError;
use crate::server::InstanceState;
use crate::session::{RequestSession, ResponseData, ResponseSource};
use crate::settings::{ProxySettings, SessionHook};

pub async fn handle(state: &InstanceState, parts: &Parts, body: Body) -> Response {
    let settings = state.settings.as_ref();

    let client = resolve_client(state);
    let (request_url, url_error) = match resolve_request_url(settings, parts) {
        Ok(url) => (url, None),
        Err(e) => (settings.external_url.clone(), Some(e)),
    };
    let forwarded_headers = build_forwarded_headers(&parts.headers, settings);
    let mut session = RequestSession::new(parts.method.clone(), request_url, forwarded_headers);

    invoke_session_hook(
        "on_request_started",
        settings.on_request_started.as_deref(),
        &session,
    );

    let outcome = match url_error {
        Some(e) => Err(e),
        None => forward(settings, client, &mut session, body).await,
    };

    let response = match outcome {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(
                request_id = %session.request_id,
                method = %session.method,
                url = %session.request_url,
                error = %e,
                "forwarding failed"
            );
            let status = match e {
                ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            session.fail(e);
            status.into_response()
        }
    };

    log_session(&session);

    invoke_session_hook(
        "on_request_finished",
        settings.on_request_finished.as_deref(),
        &session,
    );

    response
}

async fn forward(
    settings: &ProxySettings,
    client: Result<Arc<dyn HttpClient>, ProxyError>,
    session: &mut RequestSession,
    body: Body,
) -> Result<Response, ProxyError> {
    let body = read_body(body, settings.max_request_body).await?;
    let client = client?;

    if let Some(mut cached) = lookup_cache(settings, session) {
        // A replayed record describes this exchange, not the one it was recorded from.
        cached.request_id.clone_from(&session.request_id);
        cached.response_id = Uuid::new_v4().to_string();
        cached.response_time = Utc::now();
        session.response_data = Some(cached);
        session.response_source = ResponseSource::Cache;
    } else {
        send_upstream(settings, client.as_ref(), session, body).await?;
    }
    build_response(settings, session)
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes, ProxyError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(ProxyError::PayloadTooLarge { limit }),
        Err(source) => Err(ProxyError::RequestBody { source }),
    }
}

fn resolve_client(state: &InstanceState) -> Result<Arc<dyn HttpClient>, ProxyError> {
    let settings = state.settings.as_ref();

    let client: Arc<dyn HttpClient> = match settings.create_http_client.as_deref() {
        Some(create) => guarded(|| create(settings)).map_err(ProxyError::client_init)??,
        None => Arc::new(UpstreamClient::new(
            state.http_client.clone(),
            settings.external_url.clone(),
            settings.timeout,
        )),
    };

    match settings.initialize_http_client.as_deref() {
        Some(initialize) => guarded(|| initialize(client, settings)).map_err(ProxyError::client_init)?,
        None => Ok(client),
    }
}

/// Upstream URL for an inbound request: the external URL's origin with the
/// inbound path and query, unless `get_request_url` says otherwise.
fn resolve_request_url(settings: &ProxySettings, parts: &Parts) -> Result<Url, ProxyError> {
    if let Some(get_request_url) = settings.get_request_url.as_deref() {
        return guarded(|| get_request_url(settings, parts))
            .map_err(|panic| ProxyError::InvalidRequest { source: panic.into() })?;
    }

    let mut url = settings.external_url.clone();
    url.set_path(parts.uri.path());
    url.set_query(parts.uri.query());
    Ok(url)
}

fn lookup_cache(settings: &ProxySettings, session: &RequestSession) -> Option<ResponseData> {
    let get_cached_response = settings.get_cached_response.as_deref()?;

    match guarded(|| get_cached_response(session)) {
        Ok(Ok(Some(data))) if data.is_ok() => Some(data),
        Ok(Ok(Some(data))) => {
            tracing::debug!(
                request_id = %session.request_id,
                status = data.status_code,
                "ignoring cached response that is not ok"
            );
            None
        }
        Ok(Ok(None)) => None,
        Ok(Err(e)) => {
            tracing::warn!(
                request_id = %session.request_id,
                hook = "get_cached_response",
                error = %e,
                "hook failed"
            );
            None
        }
        Err(panic) => {
            tracing::warn!(
                request_id = %session.request_id,
                hook = "get_cached_response",
                panic = %panic,
                "hook panicked"
            );
            None
        }
    }
}

async fn send_upstream(
    settings: &ProxySettings,
    client: &dyn HttpClient,
    session: &mut RequestSession,
    body: Bytes,
) -> Result<(), ProxyError> {
    let mut req_builder = Request::builder()
        .method(session.method.clone())
        .uri(session.request_url.as_str());

    for (key, value) in &session.request_headers {
        req_builder = req_builder.header(key, value);
    }

    let request = req_builder
        .body(Full::new(body))
        .map_err(|e| ProxyError::InvalidRequest { source: Box::new(e) })?;

    let response = client.send(request).await?;
    let (parts, response_body) = response.into_parts();

    session.response_source = ResponseSource::Upstream;
    let data = session.response_data.insert(ResponseData::new(session.request_id.clone()));
    data.status_code = parts.status.as_u16();
    data.response_headers = build_response_headers(&parts.headers, settings);

    let collected = response_body
        .collect()
        .await
        .map_err(|source| ProxyError::BodyRead { source })?;
    data.response_content = Some(collected.to_bytes());
    data.response_time = Utc::now();
    Ok(())
}

fn build_response(settings: &ProxySettings, session: &RequestSession) -> Result<Response, ProxyError> {
    let data = session
        .response_data
        .as_ref()
        .ok_or(ProxyError::InvalidStatus(0))?;
    let status =
        StatusCode::from_u16(data.status_code).map_err(|_| ProxyError::InvalidStatus(data.status_code))?;

    // An absent body is still written as an empty one so the response is finalized.
    let content = data.response_content.clone().unwrap_or_default();
    let mut response = Response::new(Body::from(content));
    *response.status_mut() = status;
    *response.headers_mut() = build_response_headers(&data.response_headers, settings);
    Ok(response)
}

fn log_session(session: &RequestSession) {
    let source = match session.response_source {
        ResponseSource::Upstream => "upstream",
        ResponseSource::Cache => "cache",
    };
    #[allow(clippy::cast_possible_truncation)]
    let duration_ms = session.duration().as_millis() as u64;

    tracing::info!(
        request_id = %session.request_id,
        method = %session.method,
        url = %session.request_url,
        status = session.status_code().unwrap_or(0),
        source,
        duration_ms,
        ok = session.is_ok(),
        "request finished"
    );
}

fn invoke_session_hook(name: &'static str, hook: Option<&SessionHook>, session: &RequestSession) {
    let Some(hook) = hook else {
        return;
    };

    match guarded(|| hook(session)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(request_id = %session.request_id, hook = name, error = %e, "hook failed");
        }
        Err(panic) => {
            tracing::warn!(request_id = %session.request_id, hook = name, panic = %panic, "hook panicked");
        }
    }
}

/// Run a caller-supplied hook, turning a panic into its message.
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}
