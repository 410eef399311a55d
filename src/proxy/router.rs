use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::backend::BackendManager;
use crate::config::Config;
use crate::logdir::LogDir;
use crate::proxy::error::{ErrorResponse, ProxyError};
use crate::proxy::health::HealthHandler;
use crate::proxy::resolve::{explicit_logdir, is_asset_or_api, LogdirSource};
use crate::proxy::upstream::UpstreamClient;

/// Everything a request handler needs, shared across connections.
#[derive(Clone)]
pub struct RouterEngine {
    manager: BackendManager,
    upstream: Arc<UpstreamClient>,
    health: Arc<HealthHandler>,
    storage_root: Arc<PathBuf>,
    default_logdir: Option<String>,
    limiter: Arc<Semaphore>,
}

pub fn build_router(engine: RouterEngine) -> Router {
    Router::new()
        .route("/_router/health", get(health_handler))
        .route("/_router/backends", get(backends_handler))
        .fallback(proxy_handler)
        .with_state(engine)
}

async fn health_handler(State(engine): State<RouterEngine>) -> Response {
    engine.health.handle()
}

async fn backends_handler(State(engine): State<RouterEngine>) -> Response {
    engine.health.backends()
}

async fn proxy_handler(State(engine): State<RouterEngine>, req: Request<Body>) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match engine.route(req).await {
        Ok(response) => {
            tracing::debug!(
                request_id = %request_id,
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                "Request proxied"
            );
            response
        }
        Err(err) => {
            tracing::warn!(
                request_id = %request_id,
                method = %method,
                path = %path,
                error = %err,
                "Request failed"
            );
            ErrorResponse::from_error(&err, &request_id)
        }
    }
}

impl RouterEngine {
    pub fn new(config: &Config, manager: BackendManager) -> Result<Self, ProxyError> {
        let upstream = UpstreamClient::new(config.router.request_timeout())?;
        Ok(Self {
            health: Arc::new(HealthHandler::new(manager.clone())),
            manager,
            upstream: Arc::new(upstream),
            storage_root: Arc::new(config.router.storage_root.clone()),
            default_logdir: config.router.default_logdir.clone(),
            limiter: Arc::new(Semaphore::new(config.container.max_concurrent_requests)),
        })
    }

    pub fn manager(&self) -> &BackendManager {
        &self.manager
    }

    /// Resolve, start-or-reuse, and forward one request.
    pub async fn route(&self, req: Request<Body>) -> Result<Response, ProxyError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| ProxyError::Internal("request limiter closed".to_string()))?;

        let Some(logdir) = self.resolve(&req)? else {
            return Ok(self.landing_page());
        };

        let lease = self.manager.acquire(&logdir).await?;
        match self.upstream.forward(req, &lease).await {
            Err(err @ ProxyError::UpstreamUnreachable { .. }) => {
                match self.manager.report_unreachable(&lease).await {
                    Some(crashed) => Err(crashed.into()),
                    None => Err(err),
                }
            }
            other => other,
        }
    }

    /// The log directory a request targets; `None` means nothing to route to.
    pub fn resolve(&self, req: &Request<Body>) -> Result<Option<LogDir>, ProxyError> {
        if let Some(source) = explicit_logdir(req.uri(), req.headers()) {
            if let LogdirSource::Referer(raw) = &source {
                tracing::debug!(path = %req.uri().path(), logdir = %raw, "Logdir taken from referer");
            }
            return Ok(Some(LogDir::parse(&self.storage_root, source.raw())?));
        }

        if !is_asset_or_api(req.uri().path()) {
            return Ok(None);
        }
        if let Some(recent) = self.manager.most_recent() {
            return Ok(Some(recent));
        }
        match &self.default_logdir {
            Some(raw) => Ok(Some(LogDir::parse(&self.storage_root, raw)?)),
            None => Ok(None),
        }
    }

    fn landing_page(&self) -> Response {
        let running: String = self
            .manager
            .snapshot()
            .iter()
            .map(|backend| {
                let logdir = escape_html(&backend.logdir);
                format!(
                    "<li><a href=\"/?logdir={logdir}\">{logdir}</a> ({state})</li>",
                    state = backend.state,
                )
            })
            .collect();

        let running = if running.is_empty() {
            "<p>No experiments running.</p>".to_string()
        } else {
            format!("<ul>{running}</ul>")
        };

        Html(format!(
            "<!DOCTYPE html>\n<html><head><title>boardmux</title></head><body>\
             <h1>TensorBoard router</h1>\
             <p>Open an experiment with <code>/?logdir=path/to/training_dir</code>, \
             relative to <code>{root}</code>.</p>{running}</body></html>",
            root = escape_html(&self.storage_root.display().to_string()),
        ))
        .into_response()
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
