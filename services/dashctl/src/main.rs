use admin_ipc::{send_request, AdminRequest, DEFAULT_SOCKET_PATH};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "ADMIN_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    socket: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show run id, entry counts and last update time.
    Status,
    /// Upsert a signal record, e.g. '{"signal_id":"sig1","symbol":"BTCUSDT"}'.
    Signal { record: String },
    /// Upsert the price record for a symbol.
    Price { symbol: String, record: String },
    /// Drop an active signal.
    Remove { signal_id: String },
    /// Append a closed trade to the history.
    History { entry: String },
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("invalid JSON argument: {raw}"))
}

impl Command {
    fn into_request(self) -> Result<AdminRequest> {
        Ok(match self {
            Command::Status => AdminRequest::Status,
            Command::Signal { record } => AdminRequest::UpdateSignal(parse_json(&record)?),
            Command::Price { symbol, record } => AdminRequest::UpdatePrice {
                symbol,
                record: parse_json(&record)?,
            },
            Command::Remove { signal_id } => AdminRequest::RemoveSignal { signal_id },
            Command::History { entry } => AdminRequest::AddHistory(parse_json(&entry)?),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let req = cli.command.into_request()?;

    let resp = send_request(&cli.socket, &req).await?;
    println!("{}", serde_json::to_string(&resp)?);
    Ok(())
}
