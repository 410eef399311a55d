use std::future::IntoFuture;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::backend::{BackendManager, ShutdownReport};
use crate::config::Config;
use crate::proxy::error::ProxyError;
use crate::proxy::router::{build_router, RouterEngine};
use crate::proxy::shutdown::ShutdownManager;

/// How long in-flight requests may keep running after shutdown is requested.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ProxyServer {
    pub addr: SocketAddr,
    /// The bound listener. Populated by bind(), consumed by run().
    listener: Option<TcpListener>,
    engine: RouterEngine,
    manager: BackendManager,
    shutdown: Arc<ShutdownManager>,
}

impl ProxyServer {
    pub fn new(config: &Config) -> Result<Self, ProxyError> {
        Self::with_manager(config, BackendManager::from_config(config))
    }

    pub fn with_manager(config: &Config, manager: BackendManager) -> Result<Self, ProxyError> {
        let engine = RouterEngine::new(config, manager.clone())?;
        Ok(Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)), // Determined at bind time
            listener: None,
            engine,
            manager,
            shutdown: Arc::new(ShutdownManager::new()),
        })
    }

    /// Bind the listening socket. Port 0 picks a free port; the actual
    /// address is returned.
    pub async fn bind(&mut self, addr: SocketAddr) -> io::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let actual = listener.local_addr()?;
        self.addr = actual;
        self.listener = Some(listener);
        tracing::info!("Router bound to {}", actual);
        Ok(actual)
    }

    pub fn manager(&self) -> BackendManager {
        self.manager.clone()
    }

    pub fn handle(&self) -> ProxyHandle {
        ProxyHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Serve until shutdown, then stop every backend.
    ///
    /// In-flight requests get [`DRAIN_TIMEOUT`] to finish before the listener
    /// is dropped. Call bind() first.
    pub async fn run(self) -> io::Result<ShutdownReport> {
        let listener = self.listener.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "bind() must be called before run()")
        })?;

        tracing::info!("Starting router on {}", self.addr);
        let sweeper = self.manager.spawn_sweeper();

        let app = build_router(self.engine);
        let shutdown = self.shutdown.clone();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
            .into_future();

        let shutdown = self.shutdown.clone();
        let drain_deadline = async move {
            shutdown.wait_for_shutdown().await;
            tokio::time::sleep(DRAIN_TIMEOUT).await;
        };

        let served = tokio::select! {
            result = serve => result,
            _ = drain_deadline => {
                tracing::warn!("Requests still in flight after {}s, closing anyway", DRAIN_TIMEOUT.as_secs());
                Ok(())
            }
        };

        sweeper.stop().await;
        let report = self.manager.shutdown_all().await;
        served.map(|()| report)
    }
}

#[derive(Clone)]
pub struct ProxyHandle {
    shutdown: Arc<ShutdownManager>,
}

impl ProxyHandle {
    pub fn shutdown(&self) {
        self.shutdown.signal_shutdown();
    }
}
