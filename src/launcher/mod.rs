//! Process launching.
//!
//! The router never talks to processes directly; it asks a [`ProcessLauncher`]
//! for a [`ProcessHandle`] and later polls or terminates that handle. The
//! shipped [`LocalLauncher`] runs commands on this host; a remote platform
//! only needs to implement the two traits.

mod health;
mod local;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ContainerResources;

pub use health::{poll_until_healthy, Backoff, HealthCheck, HttpHealthCheck, Readiness};
pub use local::{CommandTemplate, LocalLauncher};

/// Errors raised by launchers and process handles.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to terminate {id}: {source}")]
    Terminate {
        id: String,
        #[source]
        source: std::io::Error,
    },
}

/// What to launch.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Human-readable name used in logs.
    pub name: String,
    /// Port the process must listen on.
    pub port: u16,
    /// Log directory handed to the process, if any.
    pub logdir: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    pub resources: ContainerResources,
}

/// A running process owned by exactly one caller.
///
/// Implementations must not leak the process when dropped without
/// [`terminate`](ProcessHandle::terminate).
#[async_trait]
pub trait ProcessHandle: Send + fmt::Debug {
    fn id(&self) -> String;

    /// Non-blocking liveness check.
    fn is_alive(&mut self) -> bool;

    /// Stop the process and wait for it to exit. Stopping an already exited
    /// process succeeds.
    async fn terminate(&mut self) -> Result<(), LaunchError>;
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>, LaunchError>;
}
