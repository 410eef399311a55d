use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::Instant;

/// Readiness probe for a freshly launched process.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, port: u16) -> bool;
}

/// `GET http://127.0.0.1:{port}{path}`; healthy on 2xx.
///
/// With [`requiring_field`](Self::requiring_field) the body must also be a
/// JSON object whose field is present and truthy.
pub struct HttpHealthCheck {
    client: Client,
    path: String,
    required_field: Option<String>,
}

impl HttpHealthCheck {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            path: path.into(),
            required_field: None,
        }
    }

    pub fn requiring_field(mut self, field: impl Into<String>) -> Self {
        self.required_field = Some(field.into());
        self
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{}{}", port, self.path);
        let resp = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::trace!(%url, error = %e, "Health probe failed");
                return false;
            }
        };

        if !resp.status().is_success() {
            tracing::trace!(%url, status = %resp.status(), "Health probe not ready");
            return false;
        }

        let Some(field) = &self.required_field else {
            return true;
        };

        match resp.json::<serde_json::Value>().await {
            Ok(body) => is_truthy(body.get(field)),
            Err(_) => false,
        }
    }
}

fn is_truthy(value: Option<&serde_json::Value>) -> bool {
    match value {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => !s.is_empty(),
        Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(serde_json::Value::Array(items)) => !items.is_empty(),
        Some(serde_json::Value::Object(fields)) => !fields.is_empty(),
    }
}

/// Exponential backoff: doubles each step, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }
}

/// Outcome of [`poll_until_healthy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Healthy,
    /// `alive` reported false before the probe succeeded.
    Exited,
    TimedOut,
}

/// Probe `port` until healthy, the process dies, or `timeout` elapses.
pub async fn poll_until_healthy<F, Fut>(
    check: &dyn HealthCheck,
    port: u16,
    timeout: Duration,
    mut backoff: Backoff,
    mut alive: F,
) -> Readiness
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;

    loop {
        if !alive().await {
            return Readiness::Exited;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Readiness::TimedOut;
        }

        if let Ok(true) = tokio::time::timeout(remaining, check.check(port)).await {
            return Readiness::Healthy;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Readiness::TimedOut;
        }
        tokio::time::sleep(backoff.next_delay().min(remaining)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingCheck {
        calls: Arc<AtomicUsize>,
        healthy_after: usize,
    }

    #[async_trait]
    impl HealthCheck for CountingCheck {
        async fn check(&self, _port: u16) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.healthy_after
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
    }

    #[test]
    fn truthiness_matches_status_payloads() {
        let started = serde_json::json!({"started": "2024-01-01T00:00:00Z"});
        assert!(is_truthy(started.get("started")));
        assert!(!is_truthy(serde_json::json!({"started": false}).get("started")));
        assert!(!is_truthy(serde_json::json!({"started": null}).get("started")));
        assert!(!is_truthy(serde_json::json!({}).get("started")));
    }

    #[test]
    fn zero_and_empty_values_are_falsy() {
        for value in [
            serde_json::json!(0),
            serde_json::json!(0.0),
            serde_json::json!(""),
            serde_json::json!([]),
            serde_json::json!({}),
        ] {
            assert!(!is_truthy(Some(&value)), "{value}");
        }
        for value in [serde_json::json!(1), serde_json::json!(-0.5), serde_json::json!([0])] {
            assert!(is_truthy(Some(&value)), "{value}");
        }
    }

    #[tokio::test]
    async fn becomes_healthy_after_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let check = CountingCheck {
            calls: calls.clone(),
            healthy_after: 3,
        };
        let readiness = poll_until_healthy(
            &check,
            1,
            Duration::from_secs(5),
            Backoff::new(Duration::from_millis(1), Duration::from_millis(5)),
            || async { true },
        )
        .await;
        assert_eq!(readiness, Readiness::Healthy);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn times_out_when_never_healthy() {
        let check = CountingCheck {
            calls: Arc::new(AtomicUsize::new(0)),
            healthy_after: usize::MAX,
        };
        let start = std::time::Instant::now();
        let readiness = poll_until_healthy(
            &check,
            1,
            Duration::from_millis(150),
            Backoff::new(Duration::from_millis(10), Duration::from_millis(40)),
            || async { true },
        )
        .await;
        assert_eq!(readiness, Readiness::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(140));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn dead_process_short_circuits() {
        let check = CountingCheck {
            calls: Arc::new(AtomicUsize::new(0)),
            healthy_after: 1,
        };
        let readiness = poll_until_healthy(
            &check,
            1,
            Duration::from_secs(5),
            Backoff::new(Duration::from_millis(1), Duration::from_millis(1)),
            || async { false },
        )
        .await;
        assert_eq!(readiness, Readiness::Exited);
    }

    #[tokio::test]
    async fn http_check_refused_connection_is_unhealthy() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!HttpHealthCheck::new("/data/environment").check(port).await);
    }
}
