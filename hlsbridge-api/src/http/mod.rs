// Module: http
// JSON control API consumed by the stream orchestrator

pub mod bridge;
pub mod error;
pub mod health;

use std::any::Any;
use std::sync::Arc;

use axum::{response::IntoResponse, response::Response, Router};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{self, CorsLayer};
use tower_http::trace::TraceLayer;

use hlsbridge_relay::RelayRegistry;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RelayRegistry>,
}

/// Create the HTTP router with all routes
pub fn create_router(registry: Arc<RelayRegistry>) -> Router {
    let state = AppState { registry };

    // The orchestration UI calls from the browser
    let cors_layer = CorsLayer::new()
        .allow_origin(cors::Any)
        .allow_methods(cors::Any)
        .allow_headers(cors::Any);

    Router::new()
        .merge(health::create_health_router())
        .merge(bridge::create_bridge_router())
        .fallback(route_not_found)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn route_not_found() -> AppError {
    AppError::not_found("Not found")
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("handler panicked");
    tracing::error!("Request handler panicked: {}", detail);
    AppError::internal_server_error(detail.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use hlsbridge_core::config::{DestinationConfig, RelayConfig};
    use hlsbridge_core::MemorySessionStore;
    use hlsbridge_relay::{DestinationClient, RelayContext, SourceClient};

    fn router(destination: &MockServer) -> Router {
        let destination_config = DestinationConfig {
            api_base_url: destination.uri(),
            ..DestinationConfig::default()
        };
        let ctx = RelayContext {
            store: Arc::new(MemorySessionStore::new()),
            source: SourceClient::new(Duration::from_secs(5)).unwrap(),
            destination: DestinationClient::new(&destination_config, Duration::from_secs(5)).unwrap(),
            config: RelayConfig {
                tick_interval_ms: 3_600_000,
                ..RelayConfig::default()
            },
            default_credentials: None,
        };
        create_router(Arc::new(RelayRegistry::new(ctx)))
    }

    async fn mount_create_upload(destination: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/video/v1/uploads"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "data": { "id": "up_1", "url": format!("{}/upload/up_1", destination.uri()) }
            })))
            .mount(destination)
            .await;
    }

    fn start_body(stream_id: &str) -> Value {
        json!({
            "streamId": stream_id,
            "sourceManifestURL": "https://src.example.com/live.m3u8",
            "destinationStreamKey": "key123",
            "destinationCredentials": { "tokenId": "token-id", "tokenSecret": "token-secret" }
        })
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let destination = MockServer::start().await;
        let (status, body) = send(&router(&destination), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_unmatched_route_is_json_404() {
        let destination = MockServer::start().await;
        let (status, body) = send(&router(&destination), "GET", "/bridge/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_missing_stream_id() {
        let destination = MockServer::start().await;
        let app = router(&destination);

        for (verb, uri) in [
            ("GET", "/bridge/status"),
            ("GET", "/bridge/status/"),
            ("DELETE", "/bridge/stop"),
            ("DELETE", "/bridge/stop/"),
        ] {
            let (status, body) = send(&app, verb, uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{verb} {uri}");
            assert_eq!(body, json!({ "error": "Stream ID required" }));
        }

        let mut no_id = start_body("x");
        no_id.as_object_mut().unwrap().remove("streamId");
        let (status, body) = send(&app, "POST", "/bridge/start", Some(no_id)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Stream ID required");
    }

    #[tokio::test]
    async fn test_start_rejects_bad_input() {
        let destination = MockServer::start().await;
        let app = router(&destination);

        let mut no_key = start_body("s1");
        no_key["destinationStreamKey"] = json!("");
        let (status, _) = send(&app, "POST", "/bridge/start", Some(no_key)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut bad_url = start_body("s1");
        bad_url["sourceManifestURL"] = json!("not a url");
        let (status, body) = send(&app, "POST", "/bridge/start", Some(bad_url)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("sourceManifestURL"));

        let request = Request::builder()
            .method("POST")
            .uri("/bridge/start")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert!(destination.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_status_stop_flow() {
        let destination = MockServer::start().await;
        mount_create_upload(&destination).await;
        let app = router(&destination);

        let (status, body) = send(&app, "POST", "/bridge/start", Some(start_body("s1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["destinationUploadId"], "up_1");
        assert_eq!(body["alreadyActive"], false);
        assert!(body["startedAt"].is_string());

        let (status, body) = send(&app, "GET", "/bridge/status/s1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isActive"], true);
        assert_eq!(body["segmentsTransferred"], 0);
        assert_eq!(body["bytesTransferred"], 0);
        assert_eq!(body["sourceManifestURL"], "https://src.example.com/live.m3u8");
        assert_eq!(body["destinationUploadId"], "up_1");
        assert_eq!(body["destinationStreamKeyMasked"], "****y123");
        let raw = body.to_string();
        assert!(!raw.contains("key123"));
        assert!(!raw.contains("token-secret"));

        let (status, body) = send(&app, "DELETE", "/bridge/stop/s1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["finalStats"]["segmentsTransferred"], 0);
        assert_eq!(body["finalStats"]["bytesTransferred"], 0);

        let (_, body) = send(&app, "GET", "/bridge/status/s1", None).await;
        assert_eq!(body["isActive"], false);
        assert_eq!(body["state"], "stopped");

        let (status, _) = send(&app, "POST", "/bridge/start", Some(start_body("s1"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_repeated_start_reports_already_active() {
        let destination = MockServer::start().await;
        mount_create_upload(&destination).await;
        let app = router(&destination);

        send(&app, "POST", "/bridge/start", Some(start_body("s1"))).await;
        let (status, body) = send(&app, "POST", "/bridge/start", Some(start_body("s1"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alreadyActive"], true);
    }

    #[tokio::test]
    async fn test_unknown_stream_is_404() {
        let destination = MockServer::start().await;
        let app = router(&destination);

        let (status, body) = send(&app, "GET", "/bridge/status/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "Stream not found" }));

        let (status, _) = send(&app, "DELETE", "/bridge/stop/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_creation_failure_is_500() {
        let destination = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&destination)
            .await;
        let app = router(&destination);

        let (status, body) = send(&app, "POST", "/bridge/start", Some(start_body("s1"))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert!(body["message"].as_str().unwrap().contains("401"));
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let destination = MockServer::start().await;
        let request = Request::builder()
            .method("GET")
            .uri("/health")
            .header(header::ORIGIN, "https://orchestrator.example.com")
            .body(Body::empty())
            .unwrap();

        let response = router(&destination).oneshot(request).await.unwrap();

        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }

    #[test]
    fn test_panic_response_is_json_500() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
