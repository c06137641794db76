use std::{future, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use admin_ipc::{dispatch, run_server, AdminRequest, AdminResponse, DEFAULT_SOCKET_PATH};
use anyhow::bail;
use clap::Parser;
use metrics::MetricsHandle;
use state::{StateConfig, TradingState, DEFAULT_RETENTION_DAYS};
use tokio::task;
use tokio::time;
use tracing::{info, warn, Level};
use uuid::Uuid;
use web::server::{DEFAULT_HOST, DEFAULT_PORT};
use web::{DashboardConfig, DashboardServer, ServerHandle, ServerStatus};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, env = "DASHBOARD_HOST", default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, env = "DASHBOARD_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, env = "ADMIN_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    admin_socket: String,

    #[arg(long, env = "METRICS_ADDR", default_value = "127.0.0.1:9109")]
    metrics_addr: SocketAddr,

    /// Persist closed trades here; history stays in memory when unset.
    #[arg(long, env = "HISTORY_FILE")]
    history_file: Option<PathBuf>,

    #[arg(long, env = "HISTORY_RETENTION_DAYS", default_value_t = DEFAULT_RETENTION_DAYS)]
    history_retention_days: u32,
}

impl Args {
    fn dashboard_config(&self) -> DashboardConfig {
        DashboardConfig {
            host: self.host.clone(),
            port: self.port,
        }
    }

    fn state_config(&self) -> StateConfig {
        StateConfig {
            history_file: self.history_file.clone(),
            retention_days: self.history_retention_days,
        }
    }
}

fn log_startup(args: &Args, run_id: &str) {
    info!(host = %args.host, port = args.port, "dashboard bind planned");
    info!(socket = %args.admin_socket, "admin socket bind planned");
    info!(addr = %args.metrics_addr, "metrics bind planned");
    match &args.history_file {
        Some(path) => info!(path = %path.display(), "trade history persisted"),
        None => info!("trade history kept in memory"),
    }
    info!(%run_id, "run initialized");
}

fn validate_args(args: &Args) -> anyhow::Result<()> {
    if args.history_retention_days == 0 {
        bail!("history retention must be at least one day");
    }
    if args.admin_socket.is_empty() {
        bail!("admin socket path must not be empty");
    }
    args.dashboard_config().addr()?;
    Ok(())
}

fn handle_admin(
    state: &TradingState,
    metrics: &MetricsHandle,
    run_id: &str,
    req: AdminRequest,
) -> AdminResponse {
    let is_signal = matches!(req, AdminRequest::UpdateSignal(_));
    let is_price = matches!(req, AdminRequest::UpdatePrice { .. });
    let resp = dispatch(state, run_id, req);
    if is_signal {
        metrics.signal_updated(resp == AdminResponse::Ack);
    } else if is_price {
        metrics.price_updated();
    }
    resp
}

fn remove_admin_socket(path: &str) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(error = ?err, socket = %path, "failed to remove admin socket");
        }
    }
}

/// Starts the dashboard; on failure the admin socket is removed before the
/// error is returned.
async fn start_dashboard(
    state: Arc<TradingState>,
    metrics: MetricsHandle,
    config: DashboardConfig,
    admin_socket: &str,
) -> anyhow::Result<ServerHandle> {
    let started = DashboardServer::with_config(state, config)
        .with_metrics(metrics)
        .start()
        .await;
    if started.is_err() {
        remove_admin_socket(admin_socket);
    }
    started
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = ?err, "failed to install Ctrl+C handler");
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = ?err, "failed to install SIGTERM handler");
                future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    validate_args(&args)?;

    let run_id = Uuid::new_v4().to_string();
    log_startup(&args, &run_id);

    let state = Arc::new(TradingState::with_config(args.state_config()));
    let metrics = MetricsHandle::new()?;

    let admin_state = state.clone();
    let admin_metrics = metrics.clone();
    let admin_run_id = run_id.clone();
    let socket_path = args.admin_socket.clone();
    task::spawn(async move {
        let handler = move |req: AdminRequest| -> anyhow::Result<AdminResponse> {
            Ok(handle_admin(&admin_state, &admin_metrics, &admin_run_id, req))
        };
        if let Err(err) = run_server(&socket_path, handler).await {
            tracing::error!(error = ?err, "admin ipc server failed");
        }
    });

    let metrics_addr = args.metrics_addr;
    let metrics_task = metrics.clone();
    task::spawn(async move {
        if let Err(err) = metrics_task.serve(metrics_addr).await {
            tracing::error!(error = ?err, "metrics server error");
        }
    });

    let heartbeat_counter = metrics.heartbeat_counter();
    task::spawn(async move {
        let mut ticker = time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            heartbeat_counter.inc();
        }
    });

    let dashboard = start_dashboard(
        state.clone(),
        metrics.clone(),
        args.dashboard_config(),
        &args.admin_socket,
    )
    .await?;

    info!(
        run_id = %run_id,
        dashboard = %dashboard.local_addr(),
        admin_socket = %args.admin_socket,
        metrics_addr = %args.metrics_addr,
        "ready"
    );

    let mut status = dashboard.subscribe();
    tokio::select! {
        _ = shutdown_signal() => {}
        _ = status.wait_for(|s| matches!(s, ServerStatus::Stopped | ServerStatus::Failed)) => {
            warn!("dashboard server exited on its own");
        }
    }

    let stopped = dashboard.shutdown().await;
    remove_admin_socket(&args.admin_socket);
    stopped?;
    info!(run_id = %run_id, "stopped");
    Ok(())
}
