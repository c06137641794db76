use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use state::TradingState;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/signal_dashboard.sock";

/// One request per line, JSON encoded.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum AdminRequest {
    Status,
    UpdateSignal(Value),
    UpdatePrice { symbol: String, record: Value },
    RemoveSignal { signal_id: String },
    AddHistory(Value),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AdminStatus {
    pub run_id: String,
    pub active_signals: usize,
    pub price_updates: usize,
    pub history_trades: usize,
    pub last_update: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum AdminResponse {
    Status(AdminStatus),
    Ack,
    /// The request was well formed but changed nothing.
    Ignored,
    Error(String),
}

/// Applies a request to the dashboard state.
pub fn dispatch(state: &TradingState, run_id: &str, req: AdminRequest) -> AdminResponse {
    match req {
        AdminRequest::Status => {
            let counts = state.counts();
            AdminResponse::Status(AdminStatus {
                run_id: run_id.to_string(),
                active_signals: counts.active_signals,
                price_updates: counts.price_updates,
                history_trades: counts.history_trades,
                last_update: state.last_update(),
            })
        }
        AdminRequest::UpdateSignal(record) => {
            if state.update_signal_data(record) {
                AdminResponse::Ack
            } else {
                AdminResponse::Ignored
            }
        }
        AdminRequest::UpdatePrice { symbol, record } => {
            state.update_price_data(symbol, record);
            AdminResponse::Ack
        }
        AdminRequest::RemoveSignal { signal_id } => {
            if state.remove_signal(&signal_id) {
                AdminResponse::Ack
            } else {
                AdminResponse::Ignored
            }
        }
        AdminRequest::AddHistory(entry) => {
            if entry.is_object() {
                state.add_to_history(entry);
                AdminResponse::Ack
            } else {
                AdminResponse::Error("history entry must be a JSON object".to_string())
            }
        }
    }
}

pub async fn run_server<P, F>(socket_path: P, handler: F) -> Result<()>
where
    P: AsRef<Path>,
    F: Fn(AdminRequest) -> Result<AdminResponse> + Send + Sync + 'static,
{
    let socket_path = socket_path.as_ref();
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    let handler = Arc::new(handler);
    info!(socket = %socket_path.display(), "admin ipc listening");
    loop {
        let (stream, _) = listener.accept().await?;
        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_stream(stream, handler).await {
                warn!(error = ?err, "admin ipc handler error");
            }
        });
    }
}

async fn handle_stream<F>(stream: UnixStream, handler: Arc<F>) -> Result<()>
where
    F: Fn(AdminRequest) -> Result<AdminResponse> + Send + Sync + 'static,
{
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut buf = String::new();
    let n = reader.read_line(&mut buf).await?;
    if n == 0 {
        return Ok(());
    }
    let resp = match serde_json::from_str::<AdminRequest>(buf.trim()) {
        Ok(req) => handler(req).unwrap_or_else(|err| AdminResponse::Error(err.to_string())),
        Err(err) => AdminResponse::Error(format!("malformed request: {err}")),
    };
    let line = serde_json::to_string(&resp)? + "\n";
    write_half.write_all(line.as_bytes()).await?;
    Ok(())
}

pub async fn send_request(socket_path: impl AsRef<Path>, req: &AdminRequest) -> Result<AdminResponse> {
    let mut stream = UnixStream::connect(socket_path.as_ref()).await?;
    let line = serde_json::to_string(req)? + "\n";
    stream.write_all(line.as_bytes()).await?;
    let (read_half, _) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut buf = String::new();
    if reader.read_line(&mut buf).await? == 0 {
        bail!("admin socket closed without a response");
    }
    let resp: AdminResponse = serde_json::from_str(buf.trim())?;
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_use_tagged_wire_format() {
        let req = AdminRequest::UpdatePrice {
            symbol: "BTCUSDT".into(),
            record: json!({"current_price": 1.5}),
        };
        let wire = serde_json::to_value(&req).expect("serialize");
        assert_eq!(
            wire,
            json!({"type": "UpdatePrice", "payload": {"symbol": "BTCUSDT", "record": {"current_price": 1.5}}})
        );

        let status: AdminRequest = serde_json::from_str(r#"{"type":"Status"}"#).expect("parse");
        assert_eq!(status, AdminRequest::Status);
    }

    #[test]
    fn dispatch_applies_mutations() {
        let state = TradingState::new();

        let resp = dispatch(&state, "run", AdminRequest::UpdateSignal(json!({"side": "buy"})));
        assert_eq!(resp, AdminResponse::Ignored);

        let resp = dispatch(
            &state,
            "run",
            AdminRequest::UpdateSignal(json!({"signal_id": "sig1", "side": "buy"})),
        );
        assert_eq!(resp, AdminResponse::Ack);

        let resp = dispatch(&state, "run", AdminRequest::AddHistory(json!([1, 2])));
        assert!(matches!(resp, AdminResponse::Error(_)));

        match dispatch(&state, "run", AdminRequest::Status) {
            AdminResponse::Status(status) => {
                assert_eq!(status.run_id, "run");
                assert_eq!(status.active_signals, 1);
                assert_eq!(status.history_trades, 0);
            }
            other => panic!("expected status, got {other:?}"),
        }
    }
}
