use std::path::PathBuf;
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

pub mod history;
pub mod stats;

pub use history::HistoryError;
pub use stats::{HistoryPage, HistoryQuery, HistoryStatus, SourceStats, WeeklyStats};

pub const DEFAULT_RETENTION_DAYS: u32 = 30;
const SECS_PER_DAY: f64 = 24.0 * 60.0 * 60.0;

/// Point-in-time copy of the dashboard state, serialized as-is by `/api/data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub active_signals: Map<String, Value>,
    pub price_updates: Map<String, Value>,
    pub last_update: f64,
}

#[derive(Debug, Clone)]
pub struct StateConfig {
    pub history_file: Option<PathBuf>,
    pub retention_days: u32,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            history_file: None,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

#[derive(Debug)]
struct Inner {
    active_signals: Map<String, Value>,
    price_updates: Map<String, Value>,
    trade_history: Vec<Value>,
    history_revision: u64,
    last_update: f64,
}

impl Inner {
    fn touch(&mut self) {
        self.last_update = self.last_update.max(now_secs());
    }
}

/// Shared store behind the dashboard. One lock covers every field, so an
/// upsert and its timestamp refresh are always observed together.
#[derive(Debug)]
pub struct TradingState {
    inner: RwLock<Inner>,
    /// Revision of the history last written to disk. File writes happen
    /// under this lock only, never under `inner`.
    persisted: Mutex<u64>,
    config: StateConfig,
}

impl Default for TradingState {
    fn default() -> Self {
        Self::new()
    }
}

impl TradingState {
    pub fn new() -> Self {
        Self::with_config(StateConfig::default())
    }

    /// Builds the store, loading trade history from `config.history_file` when set.
    pub fn with_config(config: StateConfig) -> Self {
        let trade_history = config
            .history_file
            .as_deref()
            .map(history::load_or_empty)
            .unwrap_or_default();

        Self {
            inner: RwLock::new(Inner {
                active_signals: Map::new(),
                price_updates: Map::new(),
                trade_history,
                history_revision: 0,
                last_update: now_secs(),
            }),
            persisted: Mutex::new(0),
            config,
        }
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Upserts a signal keyed by its `signal_id`. Records without a usable id
    /// are ignored and `false` is returned.
    pub fn update_signal_data(&self, record: Value) -> bool {
        let Some(signal_id) = signal_key(&record) else {
            debug!("signal update without signal_id ignored");
            return false;
        };

        debug!(
            signal_id = %signal_id,
            symbol = ?record.get("symbol"),
            pnl_percent = ?record.get("pnl_percent"),
            "signal updated"
        );
        let mut inner = self.write();
        inner.active_signals.insert(signal_id, record);
        inner.touch();
        true
    }

    pub fn update_price_data(&self, symbol: impl Into<String>, record: Value) {
        let symbol = symbol.into();
        debug!(
            symbol = %symbol,
            current_price = ?record.get("current_price"),
            "price updated"
        );
        let mut inner = self.write();
        inner.price_updates.insert(symbol, record);
        inner.touch();
    }

    /// Drops a signal once the caller has closed it. Returns whether it existed.
    pub fn remove_signal(&self, signal_id: &str) -> bool {
        let mut inner = self.write();
        let removed = inner.active_signals.remove(signal_id).is_some();
        if removed {
            inner.touch();
            debug!(signal_id, "signal removed");
        }
        removed
    }

    /// Appends a closed trade, prunes entries past the retention window and
    /// persists the result when a history file is configured. The file is
    /// written after the state lock is released; a stale revision is never
    /// written over a newer one.
    pub fn add_to_history(&self, entry: Value) {
        let pending = {
            let mut inner = self.write();
            inner.trade_history.push(entry);
            inner.touch();

            let cutoff = now_secs() - f64::from(self.config.retention_days) * SECS_PER_DAY;
            let before = inner.trade_history.len();
            inner.trade_history.retain(|trade| {
                trade
                    .get("timestamp")
                    .and_then(Value::as_f64)
                    .map_or(true, |ts| ts >= cutoff)
            });
            let pruned = before - inner.trade_history.len();
            if pruned > 0 {
                info!(pruned, "trade history pruned");
            }

            inner.history_revision += 1;
            self.config
                .history_file
                .is_some()
                .then(|| (inner.history_revision, inner.trade_history.clone()))
        };

        if let (Some(path), Some((revision, history))) =
            (self.config.history_file.as_deref(), pending)
        {
            let mut persisted = self.persisted.lock().unwrap_or_else(PoisonError::into_inner);
            if revision > *persisted {
                history::save_logged(path, &history);
                *persisted = revision;
            }
        }
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        let inner = self.read();
        DashboardSnapshot {
            active_signals: inner.active_signals.clone(),
            price_updates: inner.price_updates.clone(),
            last_update: inner.last_update,
        }
    }

    /// Snapshot with each signal enriched from the latest price of its symbol.
    pub fn processed_snapshot(&self) -> DashboardSnapshot {
        let inner = self.read();
        DashboardSnapshot {
            active_signals: stats::processed_signals(&inner.active_signals, &inner.price_updates),
            price_updates: inner.price_updates.clone(),
            last_update: inner.last_update,
        }
    }

    pub fn trade_history(&self) -> Vec<Value> {
        self.read().trade_history.clone()
    }

    pub fn last_update(&self) -> f64 {
        self.read().last_update
    }

    pub fn counts(&self) -> StateCounts {
        let inner = self.read();
        StateCounts {
            active_signals: inner.active_signals.len(),
            price_updates: inner.price_updates.len(),
            history_trades: inner.trade_history.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub active_signals: usize,
    pub price_updates: usize,
    pub history_trades: usize,
}

/// Extracts the map key for a signal record. Strings must be non-empty and
/// numbers non-zero; any other shape has no key.
pub fn signal_key(record: &Value) -> Option<String> {
    match record.get("signal_id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) if id.as_f64() != Some(0.0) => Some(id.to_string()),
        _ => None,
    }
}

/// Seconds since the Unix epoch with microsecond precision.
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
