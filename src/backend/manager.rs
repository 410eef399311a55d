use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::backend::entry::{BackendEntry, BackendLease, BackendSnapshot, BackendStatus};
use crate::backend::ports::PortPool;
use crate::backend::BackendError;
use crate::config::{Config, ContainerResources};
use crate::launcher::{
    poll_until_healthy, Backoff, CommandTemplate, HealthCheck, HttpHealthCheck, LaunchSpec,
    LocalLauncher, ProcessLauncher, Readiness,
};
use crate::logdir::LogDir;

/// How many times `acquire` starts over after its entry was retired under it.
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// Tunables for [`BackendManager`].
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub base_port: u16,
    pub port_range: u16,
    pub idle_timeout: Duration,
    pub startup_timeout: Duration,
    pub sweep_interval: Duration,
    pub health_initial_backoff: Duration,
    pub health_max_backoff: Duration,
    pub resources: ContainerResources,
}

impl From<&Config> for ManagerSettings {
    fn from(config: &Config) -> Self {
        let backends = &config.backends;
        Self {
            base_port: backends.base_port,
            port_range: backends.port_range,
            idle_timeout: backends.idle_timeout(),
            startup_timeout: backends.startup_timeout(),
            sweep_interval: backends.sweep_interval(),
            health_initial_backoff: Duration::from_millis(backends.health_initial_backoff_ms),
            health_max_backoff: Duration::from_millis(backends.health_max_backoff_ms),
            resources: config.container.clone(),
        }
    }
}

/// What one sweep reclaimed.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub evicted: Vec<LogDir>,
    pub crashed: Vec<LogDir>,
}

/// What `shutdown_all` stopped, and the terminations that failed.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub stopped: usize,
    pub errors: Vec<BackendError>,
}

/// Owner of the backend registry and every backend process.
///
/// Cheap to clone; clones share one registry. Lookups and "create if absent"
/// are serialized per log directory only, so unrelated experiments start in
/// parallel.
#[derive(Clone)]
pub struct BackendManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    registry: DashMap<LogDir, Arc<BackendEntry>>,
    ports: PortPool,
    launcher: Arc<dyn ProcessLauncher>,
    health: Arc<dyn HealthCheck>,
    settings: ManagerSettings,
    closed: AtomicBool,
}

impl BackendManager {
    pub fn new(
        settings: ManagerSettings,
        launcher: Arc<dyn ProcessLauncher>,
        health: Arc<dyn HealthCheck>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                registry: DashMap::new(),
                ports: PortPool::new(settings.base_port, settings.port_range),
                launcher,
                health,
                settings,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Manager launching local TensorBoard processes as configured.
    pub fn from_config(config: &Config) -> Self {
        let launcher = LocalLauncher::new(
            CommandTemplate::from(&config.backends),
            config.backends.terminate_grace(),
        );
        let health = HttpHealthCheck::new(config.backends.health_path.clone());
        Self::new(
            ManagerSettings::from(config),
            Arc::new(launcher),
            Arc::new(health),
        )
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    /// Return the entry for `logdir`, creating it and starting its backend if
    /// absent. Does not wait for the backend to become ready.
    pub fn acquire_or_create(&self, logdir: &LogDir) -> Result<Arc<BackendEntry>, BackendError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BackendError::ShuttingDown);
        }

        let (entry, created) = match self.inner.registry.entry(logdir.clone()) {
            // Being retired: its process is going away, start a fresh one.
            Entry::Occupied(mut occupied) if occupied.get().is_retired() => {
                let port = self.inner.ports.allocate()?;
                let entry = Arc::new(BackendEntry::starting(logdir.clone(), port));
                occupied.insert(entry.clone());
                (entry, true)
            }
            Entry::Occupied(occupied) => {
                let entry = occupied.get().clone();
                entry.touch();
                (entry, false)
            }
            Entry::Vacant(vacant) => {
                let port = self.inner.ports.allocate()?;
                let entry = Arc::new(BackendEntry::starting(logdir.clone(), port));
                vacant.insert(entry.clone());
                (entry, true)
            }
        };

        if created {
            tracing::info!(logdir = %logdir, port = entry.port(), "Starting backend");
            // Detached so a caller hanging up never cancels a start others wait on.
            let manager = self.clone();
            let starting = entry.clone();
            tokio::spawn(async move { manager.start_backend(starting).await });
        }

        Ok(entry)
    }

    /// Wait for a ready backend for `logdir` and check it out.
    pub async fn acquire(&self, logdir: &LogDir) -> Result<BackendLease, BackendError> {
        let startup_timeout = self.inner.settings.startup_timeout;

        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            let entry = self.acquire_or_create(logdir)?;
            match entry.wait_settled(startup_timeout).await {
                Some(BackendStatus::Ready) => match entry.checkout() {
                    Some(lease) => return Ok(lease),
                    None => {
                        tracing::debug!(logdir = %logdir, "Backend retiring while acquiring, retrying");
                    }
                },
                Some(BackendStatus::Failed(err)) => return Err(err),
                Some(BackendStatus::Stopped) => {
                    tracing::debug!(logdir = %logdir, "Backend stopped while acquiring, retrying");
                }
                Some(BackendStatus::Starting) | None => {
                    return Err(self.start_timeout(logdir));
                }
            }
        }

        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BackendError::ShuttingDown);
        }
        Err(BackendError::LaunchFailed {
            logdir: logdir.to_string(),
            reason: "backend stopped repeatedly while starting".to_string(),
        })
    }

    async fn start_backend(self, entry: Arc<BackendEntry>) {
        let started = Instant::now();
        match self.launch_and_probe(&entry, started).await {
            Ok(()) => {
                if entry.mark_ready() {
                    tracing::info!(
                        logdir = %entry.logdir(),
                        port = entry.port(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Backend ready"
                    );
                }
            }
            Err(err) => {
                tracing::warn!(logdir = %entry.logdir(), error = %err, "Backend failed to start");
                if let Err(stop_err) = self.retire(&entry, BackendStatus::Failed(err)).await {
                    tracing::warn!(logdir = %entry.logdir(), error = %stop_err, "Cleanup after failed start");
                }
            }
        }
    }

    async fn launch_and_probe(
        &self,
        entry: &Arc<BackendEntry>,
        started: Instant,
    ) -> Result<(), BackendError> {
        let settings = &self.inner.settings;
        let logdir = entry.logdir();

        let spec = LaunchSpec {
            name: format!("tensorboard:{}", logdir.relative()),
            port: entry.port(),
            logdir: Some(logdir.path().to_path_buf()),
            env: Vec::new(),
            resources: settings.resources.clone(),
        };

        // The whole start, launch included, is bounded by the startup timeout.
        let launched = tokio::time::timeout(settings.startup_timeout, async {
            logdir.inspect().await;
            self.inner.launcher.launch(&spec).await
        })
        .await;

        let handle = match launched {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                return Err(BackendError::LaunchFailed {
                    logdir: logdir.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                tracing::warn!(logdir = %logdir, "Launcher did not return within the startup timeout");
                return Err(self.start_timeout(logdir));
            }
        };

        if let Err(mut orphan) = entry.attach_process(handle).await {
            tracing::debug!(logdir = %logdir, "Entry retired during launch, stopping process");
            if let Err(e) = orphan.terminate().await {
                tracing::warn!(logdir = %logdir, error = %e, "Failed to stop orphaned process");
            }
            return Ok(());
        }

        let remaining = settings.startup_timeout.saturating_sub(started.elapsed());
        let backoff = Backoff::new(settings.health_initial_backoff, settings.health_max_backoff);
        let readiness = poll_until_healthy(
            self.inner.health.as_ref(),
            entry.port(),
            remaining,
            backoff,
            || entry.process_alive(),
        )
        .await;

        match readiness {
            Readiness::Healthy => Ok(()),
            Readiness::Exited if entry.is_retired() => Ok(()),
            Readiness::Exited => Err(BackendError::LaunchFailed {
                logdir: logdir.to_string(),
                reason: "process exited before becoming healthy".to_string(),
            }),
            Readiness::TimedOut => Err(self.start_timeout(logdir)),
        }
    }

    fn start_timeout(&self, logdir: &LogDir) -> BackendError {
        BackendError::StartTimeout {
            logdir: logdir.to_string(),
            timeout: self.inner.settings.startup_timeout,
        }
    }

    /// Remove an entry from the registry, stop its process, free its port,
    /// then publish `outcome` to everyone waiting on it.
    ///
    /// Idempotent: only the first call per entry does anything.
    async fn retire(
        &self,
        entry: &Arc<BackendEntry>,
        outcome: BackendStatus,
    ) -> Result<(), BackendError> {
        if !entry.begin_retire() {
            return Ok(());
        }
        self.finish_retire(entry, outcome).await
    }

    /// Second half of [`retire`](Self::retire), for a caller that already
    /// holds the retirement claim.
    async fn finish_retire(
        &self,
        entry: &Arc<BackendEntry>,
        outcome: BackendStatus,
    ) -> Result<(), BackendError> {
        // Deregister first so requests arriving during termination start a
        // fresh backend. The port stays reserved until the process is gone.
        self.inner
            .registry
            .remove_if(entry.logdir(), |_, current| Arc::ptr_eq(current, entry));

        let result = match entry.take_process().await {
            Some(mut handle) => handle.terminate().await.map_err(|e| BackendError::TerminateFailed {
                logdir: entry.logdir().to_string(),
                reason: e.to_string(),
            }),
            None => Ok(()),
        };

        self.inner.ports.release(entry.port());

        tracing::info!(
            logdir = %entry.logdir(),
            port = entry.port(),
            outcome = outcome.label(),
            "Backend retired"
        );
        entry.publish(outcome);
        result
    }

    /// Stop ready backends idle for longer than the idle timeout.
    pub async fn evict_idle(&self, now: Instant) -> Vec<LogDir> {
        let idle_timeout = self.inner.settings.idle_timeout;
        let is_idle = |entry: &BackendEntry| {
            entry.status() == BackendStatus::Ready
                && entry.in_flight() == 0
                && entry.idle_for(now) > idle_timeout
        };

        let candidates: Vec<Arc<BackendEntry>> = self
            .inner
            .registry
            .iter()
            .filter(|item| is_idle(item.value()))
            .map(|item| item.value().clone())
            .collect();

        let mut evicted = Vec::new();
        for entry in candidates {
            // A request may have checked out a lease since the scan.
            if !entry.begin_retire_if(|entry| is_idle(entry)) {
                continue;
            }
            tracing::info!(
                logdir = %entry.logdir(),
                idle_secs = entry.idle_for(now).as_secs(),
                "Evicting idle backend"
            );
            if let Err(e) = self.finish_retire(&entry, BackendStatus::Stopped).await {
                tracing::warn!(logdir = %entry.logdir(), error = %e, "Eviction left errors");
            }
            evicted.push(entry.logdir().clone());
        }
        evicted
    }

    /// Prune ready backends whose process has exited.
    pub async fn check_liveness(&self) -> Vec<LogDir> {
        let ready: Vec<Arc<BackendEntry>> = self
            .inner
            .registry
            .iter()
            .filter(|item| item.value().status() == BackendStatus::Ready)
            .map(|item| item.value().clone())
            .collect();

        let mut crashed = Vec::new();
        for entry in ready {
            if entry.process_alive().await {
                continue;
            }
            tracing::warn!(logdir = %entry.logdir(), "Backend process died");
            let _ = self.retire(&entry, self.crashed_status(&entry)).await;
            crashed.push(entry.logdir().clone());
        }
        crashed
    }

    /// One pass of the periodic sweep.
    pub async fn sweep(&self, now: Instant) -> SweepReport {
        let crashed = self.check_liveness().await;
        let evicted = self.evict_idle(now).await;
        SweepReport { evicted, crashed }
    }

    /// Called after a network failure talking to a ready backend.
    ///
    /// Returns `Crashed` (and prunes the entry) if the process is gone;
    /// `None` means the process is alive and the failure looks transient.
    pub async fn report_unreachable(&self, lease: &BackendLease) -> Option<BackendError> {
        let entry = lease.entry();
        if entry.process_alive().await {
            return None;
        }
        let status = self.crashed_status(entry);
        let _ = self.retire(entry, status).await;
        Some(BackendError::Crashed {
            logdir: entry.logdir().to_string(),
        })
    }

    fn crashed_status(&self, entry: &BackendEntry) -> BackendStatus {
        BackendStatus::Failed(BackendError::Crashed {
            logdir: entry.logdir().to_string(),
        })
    }

    /// Stop every backend and clear the registry. New acquisitions fail with
    /// `ShuttingDown` from here on. Keeps going past individual failures.
    pub async fn shutdown_all(&self) -> ShutdownReport {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut report = ShutdownReport::default();

        loop {
            let entries: Vec<Arc<BackendEntry>> = self
                .inner
                .registry
                .iter()
                .map(|item| item.value().clone())
                .collect();
            if entries.is_empty() {
                break;
            }

            for entry in entries {
                if entry.is_retired() {
                    // Retired by someone else; it is leaving the registry.
                    self.inner
                        .registry
                        .remove_if(entry.logdir(), |_, current| Arc::ptr_eq(current, &entry));
                    continue;
                }
                match self.retire(&entry, BackendStatus::Stopped).await {
                    Ok(()) => report.stopped += 1,
                    Err(e) => {
                        tracing::error!(logdir = %entry.logdir(), error = %e, "Failed to stop backend");
                        report.errors.push(e);
                    }
                }
            }
        }

        self.inner.ports.clear();
        tracing::info!(
            stopped = report.stopped,
            errors = report.errors.len(),
            "All backends stopped"
        );
        report
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn get(&self, logdir: &LogDir) -> Option<Arc<BackendEntry>> {
        self.inner.registry.get(logdir).map(|item| item.value().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry.is_empty()
    }

    /// Ports currently reserved for backends.
    pub fn held_ports(&self) -> Vec<u16> {
        self.inner.ports.held()
    }

    /// The ready backend used most recently, if any.
    pub fn most_recent(&self) -> Option<LogDir> {
        self.inner
            .registry
            .iter()
            .filter(|item| item.value().status() == BackendStatus::Ready)
            .max_by_key(|item| item.value().last_accessed())
            .map(|item| item.key().clone())
    }

    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<BackendSnapshot> = self
            .inner
            .registry
            .iter()
            .map(|item| item.value().snapshot(now))
            .collect();
        snapshots.sort_by(|a, b| a.logdir.cmp(&b.logdir));
        snapshots
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval` until stopped.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        let (stop, mut stopped) = watch::channel(false);
        let manager = self.clone();
        let interval = self.inner.settings.sweep_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stopped.changed() => break,
                }
                let report = manager.sweep(Instant::now()).await;
                if !report.evicted.is_empty() || !report.crashed.is_empty() {
                    tracing::info!(
                        evicted = report.evicted.len(),
                        crashed = report.crashed.len(),
                        remaining = manager.len(),
                        "Sweep finished"
                    );
                }
            }
            tracing::debug!("Sweeper stopped");
        });

        SweeperHandle { stop, task }
    }
}

/// Handle to the background sweep task.
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop after the current sweep (if any) completes.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}
