//! In-process stand-in for a TensorBoard backend.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{Request, Response, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// A captured request for assertions.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Clone)]
struct MockState {
    logdir: String,
    port: u16,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

/// Fake TensorBoard serving one log directory on a fixed port.
///
/// `GET /data/environment` answers like TensorBoard's own environment call.
/// `/status/{code}` answers with that status. Everything else echoes what it
/// received as JSON.
#[derive(Debug)]
pub struct MockTensorBoard {
    pub port: u16,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl MockTensorBoard {
    pub async fn start(port: u16, logdir: String) -> std::io::Result<Self> {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            logdir,
            port,
            requests: requests.clone(),
        };

        let app = Router::new()
            .route("/data/environment", get(environment))
            .fallback(handle_request)
            .with_state(state);

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            port,
            requests,
            shutdown: shutdown_tx,
        })
    }

    pub async fn captured_requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().await.clone()
    }

    /// Stop listening and close idle connections.
    pub fn kill(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for MockTensorBoard {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn environment(State(state): State<MockState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "data_location": state.logdir,
        "window_title": "",
    }))
}

async fn handle_request(
    State(state): State<MockState>,
    Query(params): Query<HashMap<String, String>>,
    req: Request<Body>,
) -> Response<Body> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();

    let body = axum::body::to_bytes(req.into_body(), 1024 * 1024)
        .await
        .unwrap_or_default()
        .to_vec();

    state.requests.lock().await.push(CapturedRequest {
        method: method.clone(),
        path: path.clone(),
        query,
        headers,
        body: body.clone(),
    });

    let status = path
        .strip_prefix("/status/")
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);

    let echo = serde_json::json!({
        "logdir": state.logdir,
        "port": state.port,
        "method": method,
        "path": path,
        "query_logdir": params.get("logdir"),
        "body": String::from_utf8_lossy(&body),
    });

    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .header("x-backend-port", state.port.to_string())
        .body(Body::from(echo.to_string()))
        .unwrap()
}
