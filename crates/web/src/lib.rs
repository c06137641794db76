//! HTTP surface of the signal dashboard.
//!
//! Serves the dashboard pages and a small read-only JSON API over a shared
//! [`state::TradingState`]. The server runs as a tokio task whose lifecycle is
//! observable through [`ServerHandle`].
//!
//! ```rust,ignore
//! let state = Arc::new(TradingState::new());
//! let handle = DashboardServer::new(state.clone()).start().await?;
//! state.update_price_data("BTCUSDT", json!({"current_price": 64000.0}));
//! handle.shutdown().await?;
//! ```

pub mod handlers;
pub mod server;

pub use server::{DashboardConfig, DashboardServer, ServerHandle, ServerStatus};
