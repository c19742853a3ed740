//! Listener and accept loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};

use tether::eval::{DiagnosticSink, Evaluator};
use tether::resource::{ResourceCatalog, ResourceLoader, ScriptLoader};
use tether::{CycleMode, HostConfig, order_resources};

use crate::connection;

/// State shared by every connection.
pub(crate) struct Shared {
    pub(crate) config: HostConfig,
    pub(crate) evaluator: Arc<dyn Evaluator>,
    pub(crate) catalog: Arc<dyn ResourceCatalog>,
    /// Held for the duration of each evaluation: one command runs at a time
    /// across all connections.
    pub(crate) eval_lock: Mutex<()>,
    next_id: AtomicU64,
}

/// The host end of the bridge.
pub struct ServerBridge {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ServerBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBridge")
            .field("addr", &self.listener.local_addr().ok())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl ServerBridge {
    /// Bind the listener. Connections are not accepted until [`run`](Self::run).
    pub async fn bind(
        config: HostConfig,
        evaluator: Arc<dyn Evaluator>,
        catalog: Arc<dyn ResourceCatalog>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.addr).await?;
        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                config,
                evaluator,
                catalog,
                eval_lock: Mutex::new(()),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes, then drop every open
    /// connection.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("Listening on {}", addr);
        }

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(conn = id, %peer, "Shell connected");
                        connections.spawn(connection::serve(
                            stream,
                            peer,
                            id,
                            Arc::clone(&self.shared),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!("Accept failed: {}", e);
                        tokio::time::sleep(self.shared.config.accept_retry_delay).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        tracing::info!("Host shut down");
        connections.shutdown().await;
    }

    /// Run the accept loop on a background task.
    pub fn spawn(self) -> std::io::Result<ServerHandle> {
        let addr = self.local_addr()?;
        let task = tokio::spawn(self.run());
        Ok(ServerHandle { addr, task })
    }
}

/// A host running on a background task.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the host listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and close every connection.
    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Sink that writes evaluator output to the log.
#[derive(Debug)]
struct LogSink;

impl DiagnosticSink for LogSink {
    fn emit(&self, message: &str) {
        tracing::info!("{}", message);
    }
}

/// Evaluate the catalog's script resources into `evaluator`, dependencies
/// first. Failures are logged and skipped. Returns how many loaded.
pub fn preload_resources(evaluator: &dyn Evaluator, catalog: &dyn ResourceCatalog) -> usize {
    let handles = catalog.loaded_resources();
    let ordered = order_resources(&handles, CycleMode::Lenient).unwrap_or(handles);

    let mut loader = ScriptLoader::new(evaluator, &LogSink);
    let mut loaded = 0;
    for handle in &ordered {
        match loader.load(&handle.identity) {
            Ok(()) => {
                tracing::info!("Loaded {}", handle.identity);
                loaded += 1;
            }
            Err(e) => tracing::warn!("Skipping resource: {}", e),
        }
    }
    loaded
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
