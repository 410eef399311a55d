//! Working out which log directory a request is for.
//!
//! TensorBoard's UI only carries `?logdir=` on the page URL; the assets and
//! data calls it makes afterwards do not. Those are matched back to an
//! experiment through the `Referer` header, then the most recently used
//! backend, then the configured default.

use std::collections::HashMap;

use axum::extract::Query;
use axum::http::header::REFERER;
use axum::http::{HeaderMap, Uri};

/// Where a request's log directory came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogdirSource {
    Query(String),
    Referer(String),
}

impl LogdirSource {
    pub fn raw(&self) -> &str {
        match self {
            LogdirSource::Query(raw) | LogdirSource::Referer(raw) => raw,
        }
    }
}

/// Paths TensorBoard's frontend requests without repeating `logdir`.
pub fn is_asset_or_api(path: &str) -> bool {
    const PREFIXES: [&str; 3] = ["/font-", "/data/", "/experiment/"];
    const SUFFIXES: [&str; 7] = [".js", ".css", ".woff2", ".woff", ".svg", ".png", ".ico"];

    PREFIXES.iter().any(|p| path.starts_with(p)) || SUFFIXES.iter().any(|s| path.ends_with(s))
}

/// Decoded `logdir` query parameter of `uri`, if present (possibly empty).
pub fn query_logdir(uri: &Uri) -> Option<String> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
    params.get("logdir").cloned()
}

/// `logdir` carried by the page that issued this request.
pub fn referer_logdir(headers: &HeaderMap) -> Option<String> {
    let referer = headers.get(REFERER)?.to_str().ok()?;
    let uri: Uri = referer.parse().ok()?;
    query_logdir(&uri).filter(|raw| !raw.trim().is_empty())
}

/// Explicit logdir of a request: the query parameter, or for asset/API
/// paths the referer's.
pub fn explicit_logdir(uri: &Uri, headers: &HeaderMap) -> Option<LogdirSource> {
    if let Some(raw) = query_logdir(uri) {
        return Some(LogdirSource::Query(raw));
    }
    if is_asset_or_api(uri.path()) {
        if let Some(raw) = referer_logdir(headers) {
            return Some(LogdirSource::Referer(raw));
        }
    }
    None
}
