//! Local Jupyter notebook launcher.
//!
//! Starts a notebook server protected by a random token, waits until its
//! status API reports it started, and keeps it running until interrupted or
//! the session timeout elapses.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::config::{ContainerResources, NotebookConfig};
use crate::launcher::{
    poll_until_healthy, Backoff, CommandTemplate, HealthCheck, HttpHealthCheck, LaunchError,
    LaunchSpec, LocalLauncher, ProcessHandle, ProcessLauncher, Readiness,
};

const TERMINATE_GRACE: Duration = Duration::from_secs(5);
const EXIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum NotebookError {
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("Notebook server exited before becoming ready")]
    Exited,

    #[error("Notebook server not ready after {0}s")]
    StartTimeout(u64),
}

/// Why a notebook session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Interrupted,
    TimedOut,
    ProcessExited,
}

/// Random URL-safe access token.
pub fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn access_url(host: &str, port: u16, token: &str) -> String {
    format!("http://{}:{}/?token={}", host, port, token)
}

/// Readiness probe against the notebook's status API.
pub fn status_check(token: &str) -> HttpHealthCheck {
    HttpHealthCheck::new(format!("/api/status?token={}", token)).requiring_field("started")
}

/// A started notebook server.
#[derive(Debug)]
pub struct NotebookSession {
    pub token: String,
    pub url: String,
    handle: Box<dyn ProcessHandle>,
}

impl NotebookSession {
    /// Launch the server and wait for it to report started.
    pub async fn start(
        config: &NotebookConfig,
        token: String,
        launcher: &dyn ProcessLauncher,
        health: &dyn HealthCheck,
    ) -> Result<Self, NotebookError> {
        let spec = LaunchSpec {
            name: "jupyter".to_string(),
            port: config.port,
            logdir: None,
            env: vec![("JUPYTER_TOKEN".to_string(), token.clone())],
            resources: ContainerResources::default(),
        };

        tracing::info!(port = config.port, "Starting notebook server");
        let mut handle = launcher.launch(&spec).await?;

        let readiness = poll_until_healthy(
            health,
            config.port,
            Duration::from_secs(config.startup_timeout_seconds),
            Backoff::new(Duration::from_millis(500), Duration::from_secs(2)),
            || std::future::ready(handle.is_alive()),
        )
        .await;

        let failure = match readiness {
            Readiness::Healthy => None,
            Readiness::Exited => Some(NotebookError::Exited),
            Readiness::TimedOut => Some(NotebookError::StartTimeout(config.startup_timeout_seconds)),
        };
        if let Some(err) = failure {
            if let Err(e) = handle.terminate().await {
                tracing::warn!(error = %e, "Failed to stop notebook server");
            }
            return Err(err);
        }

        let url = access_url(&config.host, config.port, &token);
        tracing::info!(%url, "Notebook server ready");
        Ok(Self { token, url, handle })
    }

    /// Block until Ctrl-C, `timeout`, or the process exits, then stop it.
    pub async fn wait(mut self, timeout: Duration) -> Result<SessionEnd, NotebookError> {
        let end = tokio::select! {
            _ = tokio::signal::ctrl_c() => SessionEnd::Interrupted,
            _ = tokio::time::sleep(timeout) => SessionEnd::TimedOut,
            _ = wait_for_exit(self.handle.as_mut()) => SessionEnd::ProcessExited,
        };
        tracing::info!(reason = ?end, "Notebook session ending");
        self.stop().await?;
        Ok(end)
    }

    pub async fn stop(mut self) -> Result<(), NotebookError> {
        self.handle.terminate().await?;
        Ok(())
    }
}

async fn wait_for_exit(handle: &mut dyn ProcessHandle) {
    while handle.is_alive() {
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}

/// Run a notebook session with the local launcher and print its URL.
pub async fn run(config: &NotebookConfig) -> Result<SessionEnd, NotebookError> {
    let token = generate_token();
    let launcher = LocalLauncher::new(CommandTemplate::from(config), TERMINATE_GRACE);
    let health = status_check(&token);

    let session = NotebookSession::start(config, token, &launcher, &health).await?;
    println!("Jupyter available at => {}", session.url);
    session.wait(Duration::from_secs(config.timeout_seconds)).await
}
