//! End-to-end forwarding through a real proxy listener to a stub upstream.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use http_body_util::Full;
use interpose::error::ProxyError;
use interpose::instance::ProxyInstance;
use interpose::proxy::client::{HttpClient, ResponseBody};
use interpose::registry::ProxyRegistry;
use interpose::session::{RequestSession, ResponseData, ResponseSource};
use interpose::settings::ProxySettings;
use tokio_util::sync::CancellationToken;

type Sessions = Arc<Mutex<Vec<RequestSession>>>;

async fn echo_headers(headers: HeaderMap) -> Json<serde_json::Value> {
    let map: serde_json::Map<String, serde_json::Value> = headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                serde_json::Value::String(v.to_str().unwrap_or_default().to_string()),
            )
        })
        .collect();
    Json(serde_json::Value::Object(map))
}

async fn start_upstream() -> SocketAddr {
    let router = Router::new()
        .route(
            "/v1/currency/",
            get(|| async {
                (
                    [("x-upstream", "currency")],
                    Json(serde_json::json!({ "USD": 1 })),
                )
            }),
        )
        .route("/headers", get(echo_headers))
        .route(
            "/stream",
            get(|| async {
                let chunks = vec![Ok::<_, Infallible>("chunk-1,"), Ok("chunk-2")];
                Body::from_stream(futures::stream::iter(chunks))
            }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                "late"
            }),
        )
        .fallback(|| async { (StatusCode::NOT_FOUND, "missing") });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn recording(settings: ProxySettings) -> (ProxySettings, Sessions) {
    let sessions: Sessions = Arc::default();
    let sink = Arc::clone(&sessions);
    let settings = settings.with_on_request_finished(move |session| {
        sink.lock().unwrap().push(session.clone());
        Ok(())
    });
    (settings, sessions)
}

async fn start_proxy(settings: ProxySettings) -> ProxyInstance {
    ProxyInstance::start(settings, &CancellationToken::new(), None)
        .await
        .unwrap()
}

/// Client that counts calls and always fails.
#[derive(Default)]
struct FailingClient {
    calls: AtomicUsize,
}

#[async_trait]
impl HttpClient for FailingClient {
    async fn send(&self, _request: Request<Full<Bytes>>) -> Result<Response<ResponseBody>, ProxyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProxyError::transport("connection refused"))
    }
}

#[tokio::test]
async fn currency_request_is_forwarded() {
    let upstream = start_upstream().await;
    let (settings, sessions) =
        recording(ProxySettings::new(&format!("http://{upstream}/")).unwrap());
    let proxy = start_proxy(settings).await;

    let resp = reqwest::get(proxy.proxy_url().join("v1/currency/").unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-upstream"], "currency");
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "USD": 1 }));

    let sessions = sessions.lock().unwrap();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(session.response_source, ResponseSource::Upstream);
    assert_eq!(session.status_code(), Some(200));
    assert!(session.is_ok());
    assert_eq!(
        session.request_url.as_str(),
        format!("http://{upstream}/v1/currency/")
    );
    drop(sessions);
    proxy.stop().await;
}

#[tokio::test]
async fn proxied_client_reaches_upstream() {
    let upstream = start_upstream().await;
    let proxy = start_proxy(ProxySettings::new(&format!("http://{upstream}")).unwrap()).await;

    let resp = proxy.client().get("/v1/currency/").await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.body().as_ref(), br#"{"USD":1}"#);

    let missing = proxy.client().get("/nope").await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(missing.body().as_ref(), b"missing");
    proxy.stop().await;
}

#[tokio::test]
async fn excluded_request_headers_never_reach_upstream() {
    let upstream = start_upstream().await;
    let settings = ProxySettings::new(&format!("http://{upstream}"))
        .unwrap()
        .with_request_headers_no_copy(["X-Secret"]);
    let proxy = start_proxy(settings).await;

    let resp = reqwest::Client::new()
        .get(proxy.proxy_url().join("headers").unwrap())
        .header("x-secret", "hunter2")
        .header("X-Keep", "yes")
        .send()
        .await
        .unwrap();
    let seen: serde_json::Value = resp.json().await.unwrap();

    assert!(seen.get("x-secret").is_none());
    assert_eq!(seen["x-keep"], "yes");
    assert_eq!(seen["host"], upstream.to_string());
    proxy.stop().await;
}

#[tokio::test]
async fn excluded_response_headers_never_reach_caller() {
    let upstream = start_upstream().await;
    let settings = ProxySettings::new(&format!("http://{upstream}"))
        .unwrap()
        .with_response_headers_no_copy(["x-UPSTREAM"]);
    let proxy = start_proxy(settings).await;

    let resp = reqwest::get(proxy.proxy_url().join("v1/currency/").unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().get("x-upstream").is_none());
    proxy.stop().await;
}

#[tokio::test]
async fn chunked_upstream_is_returned_without_transfer_encoding() {
    let upstream = start_upstream().await;
    let proxy = start_proxy(ProxySettings::new(&format!("http://{upstream}")).unwrap()).await;

    let resp = reqwest::get(proxy.proxy_url().join("stream").unwrap())
        .await
        .unwrap();
    assert!(resp.headers().get("transfer-encoding").is_none());
    assert_eq!(resp.text().await.unwrap(), "chunk-1,chunk-2");
    proxy.stop().await;
}

#[tokio::test]
async fn cached_response_skips_the_client() {
    let client = Arc::new(FailingClient::default());
    let injected = Arc::clone(&client);
    let (settings, sessions) = recording(
        ProxySettings::new("http://127.0.0.1:9")
            .unwrap()
            .with_create_http_client(move |_| Ok(injected.clone() as Arc<dyn HttpClient>))
            .with_get_cached_response(|_| {
                Ok(Some(ResponseData::ok("cached").with_header(
                    axum::http::header::TRANSFER_ENCODING,
                    HeaderValue::from_static("chunked"),
                )))
            }),
    );
    let proxy = start_proxy(settings).await;

    let resp = reqwest::get(proxy.proxy_url().join("v1/currency/").unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().get("transfer-encoding").is_none());
    assert_eq!(resp.text().await.unwrap(), "cached");

    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    let sessions = sessions.lock().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].response_source, ResponseSource::Cache);
    let data = sessions[0].response_data.as_ref().unwrap();
    assert_eq!(data.request_id, sessions[0].request_id);
    drop(sessions);
    proxy.stop().await;
}

#[tokio::test]
async fn failing_client_yields_500_and_one_finished_hook() {
    let client = Arc::new(FailingClient::default());
    let injected = Arc::clone(&client);
    let (settings, sessions) = recording(
        ProxySettings::new("http://127.0.0.1:9")
            .unwrap()
            .with_create_http_client(move |_| Ok(injected.clone() as Arc<dyn HttpClient>)),
    );
    let proxy = start_proxy(settings).await;

    let resp = reqwest::get(proxy.proxy_url().join("v1/currency/").unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    assert_eq!(resp.text().await.unwrap(), "");

    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    let sessions = sessions.lock().unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(!sessions[0].is_ok());
    assert!(matches!(
        sessions[0].exception(),
        Some(ProxyError::Transport { .. })
    ));
    drop(sessions);
    proxy.stop().await;
}

#[tokio::test]
async fn slow_upstream_times_out() {
    let upstream = start_upstream().await;
    let (settings, sessions) = recording(
        ProxySettings::new(&format!("http://{upstream}"))
            .unwrap()
            .with_timeout(Duration::from_millis(50)),
    );
    let proxy = start_proxy(settings).await;

    let resp = reqwest::get(proxy.proxy_url().join("slow").unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);

    let sessions = sessions.lock().unwrap();
    assert!(matches!(sessions[0].exception(), Some(ProxyError::Timeout(_))));
    drop(sessions);
    proxy.stop().await;
}

#[tokio::test]
async fn oversized_body_is_rejected_and_recorded() {
    let upstream = start_upstream().await;
    let (settings, sessions) = recording(
        ProxySettings::new(&format!("http://{upstream}"))
            .unwrap()
            .with_max_request_body(16),
    );
    let proxy = start_proxy(settings).await;

    let resp = reqwest::Client::new()
        .post(proxy.proxy_url().join("v1/currency/").unwrap())
        .body(vec![b'x'; 64])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let sessions = sessions.lock().unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(matches!(
        sessions[0].exception(),
        Some(ProxyError::PayloadTooLarge { limit: 16 })
    ));
    drop(sessions);
    proxy.stop().await;
}

#[tokio::test]
async fn registry_instance_serves_and_stops() {
    let upstream = start_upstream().await;
    let registry = ProxyRegistry::new();
    let settings = ProxySettings::new(&format!("http://{upstream}")).unwrap();

    let proxy = registry
        .get_or_create(settings.clone(), &CancellationToken::new())
        .await
        .unwrap();
    let again = registry
        .get_or_create(settings, &CancellationToken::new())
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&proxy, &again));

    let url = proxy.proxy_url().join("v1/currency/").unwrap();
    assert_eq!(reqwest::get(url.clone()).await.unwrap().status(), 200);

    registry.stop_all().await;
    assert!(registry.is_empty());
    assert!(reqwest::get(url).await.is_err());
}

#[tokio::test]
async fn stopping_with_a_request_in_flight_frees_the_key_first() {
    let upstream = start_upstream().await;
    let registry = ProxyRegistry::new();
    let settings = ProxySettings::new(&format!("http://{upstream}")).unwrap();
    let cancel = CancellationToken::new();

    let first = registry.get_or_create(settings.clone(), &cancel).await.unwrap();
    let in_flight = tokio::spawn(reqwest::get(first.proxy_url().join("slow").unwrap()));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopping = tokio::spawn({
        let first = Arc::clone(&first);
        async move { first.stop().await }
    });
    while !registry.is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let second = registry.get_or_create(settings, &cancel).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(!second.is_stopped());

    let drained = in_flight.await.unwrap().unwrap();
    assert_eq!(drained.status(), 200);
    assert_eq!(drained.text().await.unwrap(), "late");
    stopping.await.unwrap();
    registry.stop_all().await;
}
