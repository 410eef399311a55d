use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use crate::backend::BackendManager;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: String,
    pub backends: usize,
}

/// Router-owned status endpoints.
pub struct HealthHandler {
    manager: BackendManager,
}

impl HealthHandler {
    pub fn new(manager: BackendManager) -> Self {
        Self { manager }
    }

    pub fn status(&self) -> HealthStatus {
        let status = if self.manager.is_shutting_down() {
            "shutting_down"
        } else {
            "healthy"
        };
        HealthStatus {
            status: status.to_string(),
            service: "boardmux".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            backends: self.manager.len(),
        }
    }

    pub fn handle(&self) -> Response {
        Json(self.status()).into_response()
    }

    pub fn backends(&self) -> Response {
        Json(self.manager.snapshot()).into_response()
    }
}
