//! Dashboard server setup and lifecycle.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use metrics::MetricsHandle;
use state::TradingState;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::handlers::{route, AppContext};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardConfig {
    pub host: String,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl DashboardConfig {
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid dashboard address {}:{}", self.host, self.port))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Starting,
    Running,
    Stopped,
    Failed,
}

pub struct DashboardServer {
    state: Arc<TradingState>,
    metrics: Option<MetricsHandle>,
    config: DashboardConfig,
}

impl DashboardServer {
    pub fn new(state: Arc<TradingState>) -> Self {
        Self::with_config(state, DashboardConfig::default())
    }

    pub fn with_config(state: Arc<TradingState>, config: DashboardConfig) -> Self {
        Self {
            state,
            metrics: None,
            config,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Binds the listener and spawns the serving task. Bind errors surface
    /// here; anything after that is reported through the handle.
    pub async fn start(self) -> Result<ServerHandle> {
        let (status_tx, status_rx) = watch::channel(ServerStatus::Starting);
        let addr = self.config.addr()?;
        let ctx = AppContext::new(self.state, self.metrics);

        let make_svc = make_service_fn(move |_| {
            let ctx = ctx.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| route(req, ctx.clone())))
            }
        });

        let builder = match Server::try_bind(&addr) {
            Ok(builder) => builder,
            Err(err) => {
                let _ = status_tx.send(ServerStatus::Failed);
                return Err(err).with_context(|| format!("failed to bind dashboard on {addr}"));
            }
        };
        let server = builder.serve(make_svc);
        let local_addr = server.local_addr();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let graceful = server.with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });

        let _ = status_tx.send(ServerStatus::Running);
        info!(addr = %local_addr, "dashboard listening");

        let task = tokio::spawn(async move {
            let outcome = graceful.await;
            match &outcome {
                Ok(()) => {
                    let _ = status_tx.send(ServerStatus::Stopped);
                    info!(addr = %local_addr, "dashboard stopped");
                }
                Err(err) => {
                    let _ = status_tx.send(ServerStatus::Failed);
                    error!(error = ?err, "dashboard server failed");
                }
            }
            outcome.map_err(anyhow::Error::from)
        });

        Ok(ServerHandle {
            local_addr,
            shutdown: Some(shutdown_tx),
            status: status_rx,
            task,
        })
    }
}

/// Owner-side view of a running dashboard server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    status: watch::Receiver<ServerStatus>,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn status(&self) -> ServerStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerStatus> {
        self.status.clone()
    }

    /// Stops accepting connections, drains in-flight requests and waits for
    /// the serving task to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.wait().await
    }

    /// Waits for the server to exit on its own.
    pub async fn wait(self) -> Result<()> {
        self.task
            .await
            .map_err(|err| anyhow!("dashboard task panicked: {err}"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_all_interfaces_on_5000() {
        let config = DashboardConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5000);
        assert_eq!(
            config.addr().expect("default addr"),
            "0.0.0.0:5000".parse::<SocketAddr>().expect("addr")
        );
    }

    #[test]
    fn rejects_unparseable_host() {
        let config = DashboardConfig {
            host: "not a host".to_string(),
            port: 5000,
        };
        assert!(config.addr().is_err());
    }

    #[tokio::test]
    async fn lifecycle_moves_from_running_to_stopped() {
        let state = Arc::new(TradingState::new());
        let config = DashboardConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        let handle = DashboardServer::with_config(state, config)
            .start()
            .await
            .expect("server should start");

        assert_eq!(handle.status(), ServerStatus::Running);
        assert_ne!(handle.local_addr().port(), 0);

        let mut status = handle.status.clone();
        handle.shutdown().await.expect("clean shutdown");
        assert_eq!(*status.borrow_and_update(), ServerStatus::Stopped);
    }

    #[tokio::test]
    async fn second_bind_on_same_port_fails() {
        let state = Arc::new(TradingState::new());
        let config = DashboardConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        let first = DashboardServer::with_config(state.clone(), config)
            .start()
            .await
            .expect("first server");

        let taken = DashboardConfig {
            host: "127.0.0.1".to_string(),
            port: first.local_addr().port(),
        };
        assert!(DashboardServer::with_config(state, taken).start().await.is_err());

        first.shutdown().await.expect("clean shutdown");
    }
}
