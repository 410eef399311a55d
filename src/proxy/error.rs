//! Error types and response handling for the router.
//!
//! Every failure ends as an HTTP response with a JSON body; nothing a client
//! sends can take the router down.

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::Response;
use thiserror::Error;

use crate::backend::BackendError;
use crate::logdir::LogdirError;

/// Errors that can occur while routing a request.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Invalid logdir: {0}")]
    InvalidLogdir(#[from] LogdirError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Network-level failure reaching a backend whose process is still alive.
    #[error("Backend for '{logdir}' on port {port} is unreachable: {source}")]
    UpstreamUnreachable {
        logdir: String,
        port: u16,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request timeout after {duration}s")]
    RequestTimeout { duration: u64 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<axum::http::Error> for ProxyError {
    fn from(err: axum::http::Error) -> Self {
        ProxyError::Internal(err.to_string())
    }
}

impl ProxyError {
    /// Map error variant to appropriate HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidLogdir(_) => StatusCode::BAD_REQUEST,
            ProxyError::Backend(err) => match err {
                BackendError::StartTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                BackendError::Crashed { .. } => StatusCode::BAD_GATEWAY,
                BackendError::LaunchFailed { .. } => StatusCode::BAD_GATEWAY,
                BackendError::PortExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
                BackendError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
                BackendError::TerminateFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ProxyError::UpstreamUnreachable { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::RequestTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error type string for JSON responses
    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::InvalidLogdir(_) => "invalid_logdir",
            ProxyError::Backend(err) => match err {
                BackendError::StartTimeout { .. } => "backend_start_timeout",
                BackendError::Crashed { .. } => "backend_crashed",
                BackendError::LaunchFailed { .. } => "backend_launch_failed",
                BackendError::PortExhausted { .. } => "port_exhausted",
                BackendError::ShuttingDown => "shutting_down",
                BackendError::TerminateFailed { .. } => "terminate_failed",
            },
            ProxyError::UpstreamUnreachable { .. } => "upstream_unreachable",
            ProxyError::RequestTimeout { .. } => "request_timeout",
            ProxyError::InvalidRequest(_) => "invalid_request",
            ProxyError::Internal(_) => "internal_error",
        }
    }
}

/// Builder for standardized error responses
pub struct ErrorResponse;

impl ErrorResponse {
    /// Create a JSON error response from a ProxyError
    pub fn from_error(err: &ProxyError, request_id: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": err.error_type(),
                "message": err.to_string(),
                "request_id": request_id
            }
        });

        let mut response = Response::new(Body::from(body.to_string()));
        *response.status_mut() = err.status_code();
        response.headers_mut().insert(
            CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_logdir_is_bad_request() {
        let err = ProxyError::from(LogdirError::Traversal("../../etc".to_string()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_type(), "invalid_logdir");
    }

    #[test]
    fn start_timeout_is_gateway_timeout() {
        let err = ProxyError::from(BackendError::StartTimeout {
            logdir: "/jupyter_kernel/a".to_string(),
            timeout: std::time::Duration::from_secs(60),
        });
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.error_type(), "backend_start_timeout");
    }

    #[test]
    fn crash_is_bad_gateway() {
        let err = ProxyError::from(BackendError::Crashed {
            logdir: "/jupyter_kernel/a".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn port_exhaustion_is_server_error() {
        let err = ProxyError::from(BackendError::PortExhausted { start: 6100, end: 6101 });
        assert!(err.status_code().is_server_error());
    }

    #[tokio::test]
    async fn error_response_format() {
        let err = ProxyError::from(LogdirError::Empty);
        let response = ErrorResponse::from_error(&err, "test-id-123");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json"
        );

        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["type"], "invalid_logdir");
        assert_eq!(json["error"]["request_id"], "test-id-123");
    }
}
