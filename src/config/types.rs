use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub backends: BackendDefaults,
    #[serde(default)]
    pub container: ContainerResources,
    #[serde(default)]
    pub notebook: NotebookConfig,
}

/// Settings for the public-facing router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Bind address for the router (host:port).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Directory every `logdir` is resolved under (the shared log volume).
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    /// Fallback logdir for asset requests that carry no `logdir` at all.
    #[serde(default)]
    pub default_logdir: Option<String>,
    /// Upper bound on waiting for an upstream response, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

/// Backend allocation and lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDefaults {
    /// First port tried when allocating a backend port.
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Number of ports scanned upward from `base_port`.
    #[serde(default = "default_port_range")]
    pub port_range: u16,
    /// Seconds without requests before a backend is reclaimed.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
    /// Max seconds a backend may take to pass its health check.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_seconds: u64,
    /// Interval of the idle/liveness sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Path polled on the backend to decide it is ready.
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default = "default_health_initial_backoff_ms")]
    pub health_initial_backoff_ms: u64,
    #[serde(default = "default_health_max_backoff_ms")]
    pub health_max_backoff_ms: u64,
    /// Seconds between SIGTERM and a hard kill when stopping a backend.
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_seconds: u64,
    /// Backend executable.
    #[serde(default = "default_backend_program")]
    pub program: String,
    /// Backend arguments; `{logdir}` and `{port}` are substituted.
    #[serde(default = "default_backend_args")]
    pub args: Vec<String>,
}

/// Resource limits for the hosting environment.
///
/// `cpu`, `memory_mb`, `gpu` and `image` are forwarded to the launcher with
/// every launch; the local launcher only records them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerResources {
    #[serde(default = "default_cpu")]
    pub cpu: f32,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    #[serde(default)]
    pub gpu: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default = "default_max_containers")]
    pub max_containers: u32,
    /// Inbound requests handled at once by the router.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

/// Settings for `boardmux notebook`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookConfig {
    #[serde(default = "default_notebook_port")]
    pub port: u16,
    /// Host printed in the access URL.
    #[serde(default = "default_notebook_host")]
    pub host: String,
    /// Session lifetime before the notebook is stopped.
    #[serde(default = "default_notebook_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_notebook_startup_timeout")]
    pub startup_timeout_seconds: u64,
    #[serde(default = "default_notebook_program")]
    pub program: String,
    #[serde(default = "default_notebook_args")]
    pub args: Vec<String>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:6006".to_string()
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("/jupyter_kernel")
}

fn default_request_timeout() -> u64 {
    300
}

fn default_base_port() -> u16 {
    6100
}

fn default_port_range() -> u16 {
    200
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_startup_timeout() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_health_path() -> String {
    "/data/environment".to_string()
}

fn default_health_initial_backoff_ms() -> u64 {
    100
}

fn default_health_max_backoff_ms() -> u64 {
    2000
}

fn default_terminate_grace() -> u64 {
    5
}

fn default_backend_program() -> String {
    "tensorboard".to_string()
}

fn default_backend_args() -> Vec<String> {
    ["--logdir", "{logdir}", "--port", "{port}", "--host", "127.0.0.1"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_cpu() -> f32 {
    1.0
}

fn default_memory_mb() -> u32 {
    2048
}

fn default_max_containers() -> u32 {
    1
}

fn default_max_concurrent_requests() -> usize {
    100
}

fn default_notebook_port() -> u16 {
    8888
}

fn default_notebook_host() -> String {
    "127.0.0.1".to_string()
}

fn default_notebook_timeout() -> u64 {
    3600
}

fn default_notebook_startup_timeout() -> u64 {
    60
}

fn default_notebook_program() -> String {
    "jupyter".to_string()
}

fn default_notebook_args() -> Vec<String> {
    [
        "notebook",
        "--no-browser",
        "--allow-root",
        "--ip=0.0.0.0",
        "--port={port}",
        "--NotebookApp.allow_origin='*'",
        "--NotebookApp.allow_remote_access=1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl RouterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.bind_addr.parse()
    }
}

impl BackendDefaults {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_seconds)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            storage_root: default_storage_root(),
            default_logdir: None,
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl Default for BackendDefaults {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            port_range: default_port_range(),
            idle_timeout_seconds: default_idle_timeout(),
            startup_timeout_seconds: default_startup_timeout(),
            sweep_interval_seconds: default_sweep_interval(),
            health_path: default_health_path(),
            health_initial_backoff_ms: default_health_initial_backoff_ms(),
            health_max_backoff_ms: default_health_max_backoff_ms(),
            terminate_grace_seconds: default_terminate_grace(),
            program: default_backend_program(),
            args: default_backend_args(),
        }
    }
}

impl Default for ContainerResources {
    fn default() -> Self {
        Self {
            cpu: default_cpu(),
            memory_mb: default_memory_mb(),
            gpu: None,
            image: None,
            max_containers: default_max_containers(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

impl Default for NotebookConfig {
    fn default() -> Self {
        Self {
            port: default_notebook_port(),
            host: default_notebook_host(),
            timeout_seconds: default_notebook_timeout(),
            startup_timeout_seconds: default_notebook_startup_timeout(),
            program: default_notebook_program(),
            args: default_notebook_args(),
        }
    }
}
