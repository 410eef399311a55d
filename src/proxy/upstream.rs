use std::time::Duration;

use axum::body::Body;
use axum::http::header::{self, HeaderName};
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use reqwest::Client;
use tokio::time::timeout;

use crate::backend::BackendLease;
use crate::proxy::error::ProxyError;

/// Connection-scoped headers that must not be forwarded by a proxy.
const HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name) || name.as_str() == "keep-alive"
}

/// HTTP client for forwarding requests to local backends.
pub struct UpstreamClient {
    client: Client,
    request_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(request_timeout: Duration) -> Result<Self, ProxyError> {
        // Redirects and encodings belong to the browser; pass them through.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::Internal(format!("Failed to build upstream client: {}", e)))?;

        Ok(Self {
            client,
            request_timeout,
        })
    }

    /// Forward `req` to the leased backend and return its response verbatim.
    ///
    /// The timeout covers the wait for response headers; the body is
    /// streamed afterwards.
    pub async fn forward(
        &self,
        req: Request<Body>,
        lease: &BackendLease,
    ) -> Result<Response<Body>, ProxyError> {
        match timeout(self.request_timeout, self.do_forward(req, lease)).await {
            Ok(response) => response,
            Err(_) => Err(ProxyError::RequestTimeout {
                duration: self.request_timeout.as_secs(),
            }),
        }
    }

    async fn do_forward(
        &self,
        req: Request<Body>,
        lease: &BackendLease,
    ) -> Result<Response<Body>, ProxyError> {
        let method = req.method().clone();
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let upstream_uri = format!("http://127.0.0.1:{}{}", lease.port(), path_and_query);
        let mut builder = self.client.request(method, upstream_uri);

        for (name, value) in req.headers() {
            if name != header::HOST && !is_hop_by_hop(name) {
                builder = builder.header(name, value);
            }
        }

        let body_bytes = req
            .into_body()
            .collect()
            .await
            .map_err(|e| ProxyError::InvalidRequest(format!("Failed to read request body: {}", e)))?
            .to_bytes();

        let upstream_resp = builder
            .body(body_bytes)
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamUnreachable {
                logdir: lease.logdir().to_string(),
                port: lease.port(),
                source: e,
            })?;

        let mut response_builder = Response::builder().status(upstream_resp.status());
        for (name, value) in upstream_resp.headers() {
            if !is_hop_by_hop(name) {
                response_builder = response_builder.header(name, value);
            }
        }

        Ok(response_builder.body(Body::from_stream(upstream_resp.bytes_stream()))?)
    }
}
