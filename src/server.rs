//! Axum front that turns incoming HTTP requests into worker fetch events.
//!
//! Every `GET`/`HEAD` path is resolved against the configured origin and
//! dispatched through the worker, so a browser pointed at the listener sees
//! cached assets first and the live origin otherwise.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::warn;
use url::Url;

use crate::config::ServerConfig;
use crate::request::{RequestDescriptor, ResponseSnapshot};
use crate::worker::WorkerHandle;

/// Path of the liveness endpoint. Never proxied.
pub const HEALTH_PATH: &str = "/_precache/health";

/// Headers describing the origin connection rather than the payload.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
    "upgrade",
];

/// Shared state for the proxy handlers.
#[derive(Clone)]
pub struct ProxyState {
    pub worker: WorkerHandle,
    pub origin: Url,
    pub cache_name: String,
}

/// GET /_precache/health
async fn health(State(state): State<Arc<ProxyState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "cache": state.cache_name,
        "origin": state.origin.as_str(),
    }))
}

async fn proxy(State(state): State<Arc<ProxyState>>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return (StatusCode::METHOD_NOT_ALLOWED, "only GET and HEAD are proxied").into_response();
    }
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    // HEAD is answered from the GET entry with the body dropped.
    let descriptor = match RequestDescriptor::resolve(&state.origin, &format!(".{}", path)) {
        Ok(d) => d,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match state.worker.fetch(descriptor).await {
        Ok(snapshot) => snapshot_response(snapshot, method == Method::HEAD),
        Err(e) => {
            warn!(path = %path, error = %e, "Fetch failed");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

fn snapshot_response(snapshot: ResponseSnapshot, head_only: bool) -> Response {
    let status = StatusCode::from_u16(snapshot.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let length = snapshot.body.len();
    let body = if head_only {
        Body::empty()
    } else {
        Body::from(snapshot.body)
    };
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for (name, value) in &snapshot.headers {
        if HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_bytes(value),
        ) {
            headers.append(name, value);
        }
    }
    // An empty HEAD body would otherwise advertise a length of zero.
    if head_only {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    }
    response
}

/// Build the proxy router.
pub fn build_router(state: ProxyState) -> Router {
    let shared_state = Arc::new(state);
    Router::new()
        .route(HEALTH_PATH, get(health))
        .fallback(proxy)
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state)
}

/// Start the proxy server and run until the listener fails.
pub async fn start_server(
    config: &ServerConfig,
    state: ProxyState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Precache proxy listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::MockNetwork;
    use crate::storage::CacheStorage;
    use crate::worker::{spawn_worker, OfflineWorker, WorkerSettings};
    use axum::body::to_bytes;
    use axum::extract::Request;
    use tempfile::TempDir;
    use tokio::sync::watch;
    use tower::ServiceExt;

    struct Harness {
        router: Router,
        net: Arc<MockNetwork>,
        _tmp: TempDir,
        _shutdown: watch::Sender<bool>,
    }

    async fn harness() -> Harness {
        let tmp = TempDir::new().unwrap();
        let net = Arc::new(
            MockNetwork::new()
                .with_response(
                    "http://site.test/app/",
                    ResponseSnapshot::new("http://site.test/app/", 200, "root")
                        .with_header("Content-Type", "text/html")
                        .with_header("Transfer-Encoding", "chunked"),
                )
                .with_page("http://site.test/app/index.html", "index")
                .with_page("http://site.test/app/other.js?v=1", "js"),
        );
        let origin = Url::parse("http://site.test/app/").unwrap();
        let worker = Arc::new(OfflineWorker::new(
            WorkerSettings {
                cache_name: "uni-bot-v1".into(),
                origin: origin.clone(),
                assets: vec!["./".into(), "./index.html".into()],
            },
            CacheStorage::new(tmp.path()),
            net.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _task) = spawn_worker(worker, 16, shutdown_rx);
        handle.install().await.unwrap();
        let router = build_router(ProxyState {
            worker: handle,
            origin,
            cache_name: "uni-bot-v1".into(),
        });
        Harness {
            router,
            net,
            _tmp: tmp,
            _shutdown: shutdown_tx,
        }
    }

    async fn send(router: &Router, method: Method, uri: &str) -> Response {
        router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let h = harness().await;
        let resp = send(&h.router, Method::GET, HEALTH_PATH).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["cache"], "uni-bot-v1");
    }

    #[tokio::test]
    async fn test_cached_asset_served_without_network() {
        let h = harness().await;
        let calls = h.net.call_count();
        let resp = send(&h.router, Method::GET, "/").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "text/html");
        assert!(resp.headers().get("transfer-encoding").is_none());
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"root");
        assert_eq!(h.net.call_count(), calls);
    }

    #[tokio::test]
    async fn test_uncached_path_keeps_query_and_hits_network() {
        let h = harness().await;
        let resp = send(&h.router, Method::GET, "/other.js?v=1").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"js");
        assert_eq!(h.net.calls_for("http://site.test/app/other.js?v=1"), 1);
    }

    #[tokio::test]
    async fn test_network_failure_is_bad_gateway() {
        let h = harness().await;
        let resp = send(&h.router, Method::GET, "/offline.css").await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_head_has_no_body() {
        let h = harness().await;
        let resp = send(&h.router, Method::HEAD, "/index.html").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_head_reports_length_of_cached_body() {
        let h = harness().await;
        let resp = send(&h.router, Method::HEAD, "/index.html").await;
        assert_eq!(resp.headers()[CONTENT_LENGTH], "5");
    }

    #[test]
    fn test_snapshot_response_head_sets_content_length() {
        let snapshot = ResponseSnapshot::new("http://site.test/a.js", 200, "console.log(1)")
            .with_header("Content-Length", "999");
        let resp = snapshot_response(snapshot, true);
        assert_eq!(resp.headers()[CONTENT_LENGTH], "14");
        assert_eq!(resp.headers().get_all(CONTENT_LENGTH).iter().count(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_response_keeps_non_utf8_header_values() {
        let raw: &[u8] = b"attachment; filename=\"caf\xe9.txt\"";
        let snapshot = ResponseSnapshot::new("http://site.test/f", 200, "x")
            .with_header("Content-Disposition", raw);
        let resp = snapshot_response(snapshot, false);
        assert_eq!(resp.headers()["content-disposition"].as_bytes(), raw);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"x");
    }

    #[tokio::test]
    async fn test_other_methods_rejected() {
        let h = harness().await;
        let resp = send(&h.router, Method::POST, "/index.html").await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
