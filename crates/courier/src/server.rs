use std::any::Any;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::config::{Config, ConfigError};
use crate::gateway::CommandGateway;
use crate::handlers;
use crate::response;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: CommandGateway,
}

/// Headroom between the send timeout and the request timeout, so a stalled
/// send answers with its own `504` before the request-level `408`.
pub const SEND_TIMEOUT_HEADROOM: Duration = Duration::from_secs(2);

/// HTTP-level settings resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub enable_cors: bool,
    pub body_limit: usize,
    pub request_timeout: Duration,
}

impl ServerOptions {
    /// The request timeout never fires before the send timeout plus
    /// [`SEND_TIMEOUT_HEADROOM`].
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let configured = config.server.request_timeout();
        let floor = config.session.send_timeout() + SEND_TIMEOUT_HEADROOM;
        if configured < floor {
            warn!(
                configured_ms = configured.as_millis() as u64,
                effective_ms = floor.as_millis() as u64,
                "Request timeout raised above the send timeout"
            );
        }
        Ok(Self {
            enable_cors: config.server.enable_cors,
            body_limit: config.server.body_limit_bytes()?,
            request_timeout: configured.max(floor),
        })
    }
}

pub fn build_app(state: AppState, options: &ServerOptions) -> Router {
    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/qr", get(handlers::qr))
        .route("/send", post(handlers::send))
        .route("/logout", post(handlers::logout))
        .with_state(state)
        .layer(DefaultBodyLimit::max(options.body_limit))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            options.request_timeout,
        ))
        .layer(TraceLayer::new_for_http());

    if options.enable_cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    error!(panic = %detail, "Unhandled error while serving request");
    response::internal_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::driver::DriverEvent;
    use crate::driver::testing::{ScriptedDriver, SendBehavior};
    use crate::render::QrRenderer;
    use crate::session::SessionMachine;

    struct TestApp {
        app: Router,
        session: SessionMachine,
        driver: Arc<ScriptedDriver>,
    }

    fn test_app() -> TestApp {
        let driver = Arc::new(ScriptedDriver::new());
        let session = SessionMachine::new(driver.clone(), QrRenderer::default());
        let gateway = CommandGateway::new(session.clone(), Duration::from_millis(100));
        let options = ServerOptions {
            enable_cors: true,
            body_limit: 1024,
            request_timeout: Duration::from_secs(10),
        };
        TestApp {
            app: build_app(AppState { gateway }, &options),
            session,
            driver,
        }
    }

    impl TestApp {
        async fn connect(&self) {
            self.session.apply(DriverEvent::Authenticated).await;
            self.session.apply(DriverEvent::Ready).await;
        }

        async fn call(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.into_body().collect().await.unwrap().to_bytes();
            (status, headers, body.to_vec())
        }

        async fn get(&self, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
            self.call(Request::get(uri).body(Body::empty()).unwrap())
                .await
        }

        async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
            let request = Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();
            let (status, _, body) = self.call(request).await;
            (status, serde_json::from_slice(&body).unwrap())
        }
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let app = test_app();
        let (status, _, body) = app.get("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn status_reports_connected_flag() {
        let app = test_app();
        let (_, _, body) = app.get("/status").await;
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            json!({"connected": false})
        );

        app.connect().await;
        let (status, _, body) = app.get("/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            json!({"connected": true})
        );
    }

    #[tokio::test]
    async fn qr_lifecycle() {
        let app = test_app();

        let (status, _, body) = app.get("/qr").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["ok"], false);
        assert!(body["message"].is_string());

        app.session
            .apply(DriverEvent::PairingCode {
                code: "CODE1".to_string(),
            })
            .await;

        let (status, headers, body) = app.get("/qr").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(body, QrRenderer::default().render_png("CODE1").unwrap());

        let (status, headers, body) = app.get("/qr?format=json").await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            headers[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("application/json")
        );
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert!(body["qr"].as_str().unwrap().starts_with("data:image/png;base64,"));
        assert!(body["generatedAt"].as_i64().unwrap() > 0);

        let request = Request::get("/qr")
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = app.call(request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(serde_json::from_slice::<Value>(&body).unwrap()["qr"].is_string());

        let (status, headers, _) = app.get("/qr?format=json&format=png").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");

        app.connect().await;
        let (status, _, body) = app.get("/qr").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let app = test_app();
        let (status, body) = app
            .post_json("/send", json!({"to": "521234567890", "message": "hola"}))
            .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ok"], false);
        assert!(app.driver.sent().is_empty());
    }

    #[tokio::test]
    async fn send_validates_input() {
        let app = test_app();
        app.connect().await;

        let (status, body) = app.post_json("/send", json!({"to": "12345", "message": "hola"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);

        let (status, _) = app.post_json("/send", json!({"message": "hola"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::post("/send")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _, _) = app.call(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(app.driver.sent().is_empty());
    }

    #[tokio::test]
    async fn send_success() {
        let app = test_app();
        app.connect().await;

        let (status, body) = app
            .post_json("/send", json!({"to": "521234567890", "message": "hola"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));
        assert_eq!(app.driver.sent().len(), 1);
    }

    #[tokio::test]
    async fn send_timeout_and_failure() {
        let app = test_app();
        app.connect().await;

        app.driver.set_send_behavior(SendBehavior::Hang);
        let (status, body) = app
            .post_json("/send", json!({"to": "521234567890", "message": "hola"}))
            .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["ok"], false);

        app.driver
            .set_send_behavior(SendBehavior::Fail("boom".to_string()));
        let (status, body) = app
            .post_json("/send", json!({"to": "521234567890", "message": "hola"}))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["ok"], false);
        assert!(!body["message"].as_str().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let app = test_app();
        app.connect().await;

        let message = "x".repeat(4096);
        let request = Request::post("/send")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"to": "521234567890", "message": message}).to_string(),
            ))
            .unwrap();
        let (status, _, _) = app.call(request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(app.driver.sent().is_empty());
    }

    #[tokio::test]
    async fn logout_clears_session() {
        let app = test_app();
        app.connect().await;

        let (status, body) = app.post_json("/logout", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));
        assert!(!app.session.snapshot().connected());

        app.driver.set_logout_fails(true);
        let (status, body) = app.post_json("/logout", json!({})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn cors_headers_when_enabled() {
        let app = test_app();
        let request = Request::get("/health")
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let (_, headers, _) = app.call(request).await;
        assert!(headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[test]
    fn request_timeout_stays_above_send_timeout() {
        let mut config = Config::default();
        let options = ServerOptions::from_config(&config).unwrap();
        assert_eq!(options.request_timeout, Duration::from_secs(60));

        config.server.request_timeout_seconds = 1;
        config
            .apply_env(|key| (key == "SEND_TIMEOUT_MS").then(|| "61000".to_string()))
            .unwrap();
        let options = ServerOptions::from_config(&config).unwrap();
        assert_eq!(
            options.request_timeout,
            Duration::from_millis(61_000) + SEND_TIMEOUT_HEADROOM
        );
    }

    #[tokio::test]
    async fn stalled_send_times_out_with_gateway_timeout() {
        let mut config = Config::default();
        config.server.request_timeout_seconds = 1;
        config
            .apply_env(|key| (key == "SEND_TIMEOUT_MS").then(|| "1500".to_string()))
            .unwrap();
        let options = ServerOptions::from_config(&config).unwrap();

        let driver = Arc::new(ScriptedDriver::new());
        driver.set_send_behavior(SendBehavior::Hang);
        let session = SessionMachine::new(driver.clone(), QrRenderer::default());
        let gateway = CommandGateway::new(session.clone(), config.session.send_timeout());
        let app = TestApp {
            app: build_app(AppState { gateway }, &options),
            session,
            driver,
        };
        app.connect().await;

        let (status, body) = app
            .post_json("/send", json!({"to": "521234567890", "message": "hola"}))
            .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["ok"], false);
    }

    #[test]
    fn panic_becomes_internal_error() {
        let response = handle_panic(Box::new("handler exploded"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
