//! Shared test utilities and mock infrastructure.

#![allow(dead_code, unused_imports)]

pub mod mock_backend;

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use boardmux::backend::{BackendManager, ManagerSettings};
use boardmux::config::{Config, ContainerResources};
use boardmux::launcher::{
    HttpHealthCheck, LaunchError, LaunchSpec, ProcessHandle, ProcessLauncher,
};

use mock_backend::MockTensorBoard;

/// Ports per test; blocks never overlap within one test binary.
const PORT_BLOCK: u16 = 16;
static NEXT_BLOCK: AtomicU16 = AtomicU16::new(0);

/// Find an available port for testing.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to free port");
    listener.local_addr().unwrap().port()
}

/// A base port reserved for one test's backends.
pub fn port_block() -> u16 {
    let block = NEXT_BLOCK.fetch_add(1, Ordering::SeqCst);
    31000 + (std::process::id() % 50) as u16 * 400 + block * PORT_BLOCK
}

/// Manager settings tuned for fast tests.
pub fn test_settings() -> ManagerSettings {
    ManagerSettings {
        base_port: port_block(),
        port_range: PORT_BLOCK,
        idle_timeout: Duration::from_secs(60),
        startup_timeout: Duration::from_secs(5),
        sweep_interval: Duration::from_secs(3600),
        health_initial_backoff: Duration::from_millis(10),
        health_max_backoff: Duration::from_millis(50),
        resources: ContainerResources::default(),
    }
}

pub fn manager_with(settings: ManagerSettings, launcher: Arc<MockLauncher>) -> BackendManager {
    BackendManager::new(
        settings,
        launcher,
        Arc::new(HttpHealthCheck::new("/data/environment")),
    )
}

/// Router config rooted in a fresh temporary directory.
pub fn test_config() -> (TempDir, Config) {
    let root = TempDir::new().expect("Failed to create temp dir");
    let mut config = Config::default();
    config.router.bind_addr = "127.0.0.1:0".to_string();
    config.router.storage_root = root.path().to_path_buf();
    config.router.request_timeout_seconds = 5;
    (root, config)
}

/// How launched processes behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Serves HTTP and passes health checks.
    Healthy,
    /// Stays alive but never answers.
    NeverHealthy,
    /// The launch itself fails.
    FailLaunch,
    /// Launches, then exits before becoming healthy.
    ExitImmediately,
}

/// Observable side of a launched mock process.
#[derive(Debug)]
pub struct ProcessProbe {
    pub port: u16,
    pub logdir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    alive: AtomicBool,
    terminated: AtomicBool,
}

impl ProcessProbe {
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// Launcher whose "processes" are in-process HTTP servers.
pub struct MockLauncher {
    mode: Mutex<LaunchMode>,
    launch_delay: Duration,
    terminate_delay: Mutex<Duration>,
    launches: AtomicUsize,
    processes: Mutex<Vec<(Arc<ProcessProbe>, Arc<MockTensorBoard>)>>,
    probes: Mutex<Vec<Arc<ProcessProbe>>>,
}

impl MockLauncher {
    pub fn new(mode: LaunchMode) -> Arc<Self> {
        Self::with_delay(mode, Duration::ZERO)
    }

    pub fn with_delay(mode: LaunchMode, launch_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            launch_delay,
            terminate_delay: Mutex::new(Duration::ZERO),
            launches: AtomicUsize::new(0),
            processes: Mutex::new(Vec::new()),
            probes: Mutex::new(Vec::new()),
        })
    }

    pub fn set_mode(&self, mode: LaunchMode) {
        *self.mode.lock() = mode;
    }

    /// Launch attempts so far, including failed ones.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Processes launched from now on keep serving for `delay` after being
    /// asked to terminate, like a slow SIGTERM handler.
    pub fn set_terminate_delay(&self, delay: Duration) {
        *self.terminate_delay.lock() = delay;
    }

    /// Every process launched so far.
    pub fn probes(&self) -> Vec<Arc<ProcessProbe>> {
        self.probes.lock().clone()
    }

    /// Kill the running process on `port` without telling the router.
    pub fn crash(&self, port: u16) {
        for (probe, server) in self.processes.lock().iter() {
            if probe.port == port && probe.is_alive() {
                probe.alive.store(false, Ordering::SeqCst);
                server.kill();
            }
        }
    }

    /// The fake backend serving `port`, if one is running.
    pub fn server(&self, port: u16) -> Option<Arc<MockTensorBoard>> {
        self.processes
            .lock()
            .iter()
            .find(|(probe, _)| probe.port == port && probe.is_alive())
            .map(|(_, server)| server.clone())
    }
}

#[async_trait]
impl ProcessLauncher for MockLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>, LaunchError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }

        let mode = *self.mode.lock();
        if mode == LaunchMode::FailLaunch {
            return Err(LaunchError::Spawn {
                program: "mock-tensorboard".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
            });
        }

        let probe = Arc::new(ProcessProbe {
            port: spec.port,
            logdir: spec.logdir.clone(),
            env: spec.env.clone(),
            alive: AtomicBool::new(mode != LaunchMode::ExitImmediately),
            terminated: AtomicBool::new(false),
        });
        self.probes.lock().push(probe.clone());

        let server = if mode == LaunchMode::Healthy {
            let logdir = spec
                .logdir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            let server = MockTensorBoard::start(spec.port, logdir)
                .await
                .map_err(|source| LaunchError::Spawn {
                    program: "mock-tensorboard".to_string(),
                    source,
                })?;
            let server = Arc::new(server);
            self.processes.lock().push((probe.clone(), server.clone()));
            Some(server)
        } else {
            None
        };

        Ok(Box::new(MockProcess {
            probe,
            server,
            terminate_delay: *self.terminate_delay.lock(),
        }))
    }
}

#[derive(Debug)]
struct MockProcess {
    probe: Arc<ProcessProbe>,
    server: Option<Arc<MockTensorBoard>>,
    terminate_delay: Duration,
}

#[async_trait]
impl ProcessHandle for MockProcess {
    fn id(&self) -> String {
        format!("mock[{}]", self.probe.port)
    }

    fn is_alive(&mut self) -> bool {
        self.probe.is_alive()
    }

    async fn terminate(&mut self) -> Result<(), LaunchError> {
        if !self.terminate_delay.is_zero() {
            tokio::time::sleep(self.terminate_delay).await;
        }
        self.probe.alive.store(false, Ordering::SeqCst);
        self.probe.terminated.store(true, Ordering::SeqCst);
        if let Some(server) = &self.server {
            server.kill();
        }
        Ok(())
    }
}
