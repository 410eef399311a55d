use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::backend::BackendError;
use crate::launcher::ProcessHandle;
use crate::logdir::LogDir;

/// Lifecycle state of one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Starting,
    Ready,
    Failed(BackendError),
    Stopped,
}

impl BackendStatus {
    pub fn label(&self) -> &'static str {
        match self {
            BackendStatus::Starting => "starting",
            BackendStatus::Ready => "ready",
            BackendStatus::Failed(_) => "failed",
            BackendStatus::Stopped => "stopped",
        }
    }
}

/// Registry entry for one log directory.
///
/// State changes are published on a watch channel, so any number of requests
/// can wait on a backend that is still starting and all observe the same
/// outcome.
pub struct BackendEntry {
    logdir: LogDir,
    port: u16,
    created_at: Instant,
    status: watch::Sender<BackendStatus>,
    last_accessed: Mutex<Instant>,
    in_flight: AtomicUsize,
    retired: AtomicBool,
    /// Serializes checkouts against retirement claims.
    gate: Mutex<()>,
    process: tokio::sync::Mutex<Option<Box<dyn ProcessHandle>>>,
}

/// Point-in-time view of an entry, served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub logdir: String,
    pub port: u16,
    pub state: &'static str,
    pub idle_seconds: u64,
    pub uptime_seconds: u64,
    pub in_flight: usize,
}

impl BackendEntry {
    pub(crate) fn starting(logdir: LogDir, port: u16) -> Self {
        let now = Instant::now();
        let (status, _) = watch::channel(BackendStatus::Starting);
        Self {
            logdir,
            port,
            created_at: now,
            status,
            last_accessed: Mutex::new(now),
            in_flight: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
            gate: Mutex::new(()),
            process: tokio::sync::Mutex::new(None),
        }
    }

    pub fn logdir(&self) -> &LogDir {
        &self.logdir
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn status(&self) -> BackendStatus {
        self.status.borrow().clone()
    }

    pub fn last_accessed(&self) -> Instant {
        *self.last_accessed.lock()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_accessed())
    }

    pub(crate) fn touch(&self) {
        let mut last = self.last_accessed.lock();
        *last = (*last).max(Instant::now());
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Wait until the entry leaves `Starting`. `None` if `timeout` elapses first.
    pub(crate) async fn wait_settled(&self, timeout: Duration) -> Option<BackendStatus> {
        let mut rx = self.status.subscribe();
        let settled = tokio::time::timeout(
            timeout,
            rx.wait_for(|status| !matches!(status, BackendStatus::Starting)),
        )
        .await;

        match settled {
            Ok(Ok(status)) => Some(status.clone()),
            // The sender lives as long as the entry; treat closure as stopped.
            Ok(Err(_)) => Some(BackendStatus::Stopped),
            Err(_) => None,
        }
    }

    /// `Starting -> Ready`, unless the entry was retired in the meantime.
    pub(crate) fn mark_ready(&self) -> bool {
        self.status.send_if_modified(|status| {
            if *status == BackendStatus::Starting && !self.is_retired() {
                *status = BackendStatus::Ready;
                true
            } else {
                false
            }
        })
    }

    /// Claim the right to retire this entry. Only the first caller wins.
    pub(crate) fn begin_retire(&self) -> bool {
        let _gate = self.gate.lock();
        !self.retired.swap(true, Ordering::SeqCst)
    }

    /// Like [`begin_retire`](Self::begin_retire), but only while `idle` still
    /// holds. No lease can be checked out between the check and the claim.
    pub(crate) fn begin_retire_if(&self, idle: impl FnOnce(&Self) -> bool) -> bool {
        let _gate = self.gate.lock();
        if self.is_retired() || !idle(self) {
            return false;
        }
        self.retired.store(true, Ordering::SeqCst);
        true
    }

    /// Check out a lease, unless the entry is being retired.
    pub(crate) fn checkout(self: &Arc<Self>) -> Option<BackendLease> {
        let _gate = self.gate.lock();
        if self.is_retired() {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.touch();
        Some(BackendLease {
            entry: self.clone(),
        })
    }

    pub(crate) fn publish(&self, status: BackendStatus) {
        self.status.send_replace(status);
    }

    /// Hand the launched process to the entry.
    ///
    /// If the entry was retired while the process was launching, the handle
    /// is given back so the caller can terminate it.
    pub(crate) async fn attach_process(
        &self,
        handle: Box<dyn ProcessHandle>,
    ) -> Result<(), Box<dyn ProcessHandle>> {
        let mut slot = self.process.lock().await;
        if self.is_retired() {
            return Err(handle);
        }
        *slot = Some(handle);
        Ok(())
    }

    pub(crate) async fn take_process(&self) -> Option<Box<dyn ProcessHandle>> {
        self.process.lock().await.take()
    }

    /// False once retired, before a process is attached, or after it exited.
    pub(crate) async fn process_alive(&self) -> bool {
        if self.is_retired() {
            return false;
        }
        self.process
            .lock()
            .await
            .as_mut()
            .is_some_and(|handle| handle.is_alive())
    }

    pub fn snapshot(&self, now: Instant) -> BackendSnapshot {
        BackendSnapshot {
            logdir: self.logdir.relative().to_string(),
            port: self.port,
            state: self.status.borrow().label(),
            idle_seconds: self.idle_for(now).as_secs(),
            uptime_seconds: now.saturating_duration_since(self.created_at).as_secs(),
            in_flight: self.in_flight(),
        }
    }
}

/// A ready backend checked out for one proxied request.
///
/// Holding a lease keeps the backend from being idle-evicted; dropping it
/// records the access time.
pub struct BackendLease {
    entry: Arc<BackendEntry>,
}

impl BackendLease {
    pub fn port(&self) -> u16 {
        self.entry.port
    }

    pub fn logdir(&self) -> &LogDir {
        &self.entry.logdir
    }

    pub fn entry(&self) -> &Arc<BackendEntry> {
        &self.entry
    }
}

impl std::fmt::Debug for BackendLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendLease")
            .field("logdir", &self.entry.logdir)
            .field("port", &self.entry.port)
            .finish()
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        self.entry.touch();
        self.entry.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
