//! Derived views over the trade history and active signals.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const HISTORY_PAGE_SIZE: usize = 50;
pub const SOURCE_STATS_DAYS: u32 = 7;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeeklyStats {
    pub week_start: String,
    pub total_trades: u64,
    pub profitable_trades: u64,
    pub total_pnl: f64,
    pub sources: BTreeMap<String, u64>,
    pub closed_trades: u64,
    pub active_trades: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub total_trades: u64,
    pub profitable_trades: u64,
    pub total_pnl: f64,
    pub avg_leverage: f64,
    pub leverage_sum: f64,
    pub leverage_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryStatus {
    #[default]
    All,
    Active,
    Completed,
    Stopped,
}

impl HistoryStatus {
    /// Unknown values fall back to `All`.
    pub fn from_param(raw: &str) -> Self {
        match raw {
            "active" => Self::Active,
            "completed" => Self::Completed,
            "stopped" => Self::Stopped,
            _ => Self::All,
        }
    }

    fn matches(self, trade: &Value) -> bool {
        let reason = trade.get("close_reason");
        match self {
            Self::All => true,
            Self::Active => reason.is_none(),
            Self::Completed => reason.and_then(Value::as_str) == Some("all_take_profits"),
            Self::Stopped => reason.and_then(Value::as_str) == Some("stop_loss"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub page: usize,
    pub source: Option<String>,
    pub status: HistoryStatus,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            page: 1,
            source: None,
            status: HistoryStatus::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub history: Vec<Value>,
    pub total_count: usize,
    pub page: usize,
    pub per_page: usize,
}

fn timestamp(trade: &Value) -> Option<f64> {
    trade.get("timestamp").and_then(Value::as_f64)
}

/// PnL of a closed trade in percent, measured from its first entry price.
pub fn trade_pnl_percent(trade: &Value) -> Option<f64> {
    let close = trade.get("close_price")?.as_f64()?;
    let entry = trade.get("entry_prices")?.get(0)?.as_f64()?;
    if entry == 0.0 {
        return None;
    }
    let pnl = if trade.get("direction").and_then(Value::as_str) == Some("LONG") {
        (close - entry) / entry * 100.0
    } else {
        (entry - close) / entry * 100.0
    };
    Some(pnl)
}

fn source_of(trade: &Value) -> String {
    trade
        .get("source")
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
        .to_string()
}

/// Buckets trades by ISO week (`2024-W07`). Undated trades are skipped.
pub fn weekly_stats(history: &[Value]) -> BTreeMap<String, WeeklyStats> {
    let mut weeks: BTreeMap<String, WeeklyStats> = BTreeMap::new();

    for trade in history {
        let Some(when) = timestamp(trade).and_then(to_datetime) else {
            continue;
        };
        let iso = when.iso_week();
        let key = format!("{}-W{:02}", iso.year(), iso.week());
        let week = weeks.entry(key).or_insert_with(|| {
            let monday = when.date_naive()
                - Duration::days(i64::from(when.weekday().num_days_from_monday()));
            WeeklyStats {
                week_start: monday.format("%Y-%m-%d").to_string(),
                ..WeeklyStats::default()
            }
        });

        week.total_trades += 1;
        if let Some(pnl) = trade_pnl_percent(trade) {
            week.total_pnl += pnl;
            if pnl > 0.0 {
                week.profitable_trades += 1;
            }
        }
        *week.sources.entry(source_of(trade)).or_default() += 1;
        if trade.get("close_reason").is_some() {
            week.closed_trades += 1;
        } else {
            week.active_trades += 1;
        }
    }

    weeks
}

/// Per-source aggregates over trades opened within the last `days` days of `now`.
pub fn source_stats(history: &[Value], now: f64, days: u32) -> BTreeMap<String, SourceStats> {
    let cutoff = now - f64::from(days) * 24.0 * 60.0 * 60.0;
    let mut sources: BTreeMap<String, SourceStats> = BTreeMap::new();

    for trade in history {
        if !timestamp(trade).is_some_and(|ts| ts >= cutoff) {
            continue;
        }
        let stats = sources.entry(source_of(trade)).or_default();
        stats.total_trades += 1;

        if let Some(pnl) = trade_pnl_percent(trade) {
            stats.total_pnl += pnl;
            if pnl > 0.0 {
                stats.profitable_trades += 1;
            }
        }
        if let Some(leverage) = trade
            .get("leverage")
            .and_then(Value::as_f64)
            .filter(|l| *l != 0.0)
        {
            stats.leverage_sum += leverage;
            stats.leverage_count += 1;
        }
    }

    for stats in sources.values_mut() {
        if stats.leverage_count > 0 {
            stats.avg_leverage = stats.leverage_sum / stats.leverage_count as f64;
        }
    }
    sources
}

/// Filters, sorts newest first and pages the history.
pub fn query_history(history: &[Value], query: &HistoryQuery) -> HistoryPage {
    let mut filtered: Vec<&Value> = history
        .iter()
        .filter(|trade| match query.source.as_deref() {
            Some(source) if !source.is_empty() => {
                trade.get("source").and_then(Value::as_str) == Some(source)
            }
            _ => true,
        })
        .filter(|trade| query.status.matches(trade))
        .collect();

    filtered.sort_by(|a, b| {
        let a = timestamp(a).unwrap_or(0.0);
        let b = timestamp(b).unwrap_or(0.0);
        b.total_cmp(&a)
    });

    let page = query.page.max(1);
    let total_count = filtered.len();
    let history = filtered
        .into_iter()
        .skip((page - 1).saturating_mul(HISTORY_PAGE_SIZE))
        .take(HISTORY_PAGE_SIZE)
        .cloned()
        .collect();

    HistoryPage {
        history,
        total_count,
        page,
        per_page: HISTORY_PAGE_SIZE,
    }
}

/// Overlays the latest price of each signal's symbol onto the signal and
/// recomputes which take-profit levels that price has reached.
pub fn processed_signals(
    signals: &Map<String, Value>,
    prices: &Map<String, Value>,
) -> Map<String, Value> {
    signals
        .iter()
        .map(|(id, signal)| {
            let mut processed = signal.clone();
            let price = signal
                .get("symbol")
                .and_then(Value::as_str)
                .and_then(|symbol| prices.get(symbol));

            let current = price
                .and_then(|price| price.get("current_price"))
                .filter(|current| !current.is_null());
            if let (Some(price), Some(current), Some(fields)) =
                (price, current, processed.as_object_mut())
            {
                if let Some(current) = current.as_f64() {
                    let direction = signal.get("direction").and_then(Value::as_str);
                    let reached: Vec<usize> = signal
                        .get("take_profits")
                        .and_then(Value::as_array)
                        .map(|tps| {
                            tps.iter()
                                .enumerate()
                                .filter(|(_, tp)| match (direction, tp.as_f64()) {
                                    (Some("LONG"), Some(tp)) => current >= tp,
                                    (Some("SHORT"), Some(tp)) => current <= tp,
                                    _ => false,
                                })
                                .map(|(idx, _)| idx)
                                .collect()
                        })
                        .unwrap_or_default();
                    fields.insert("reached_tps".into(), json!(reached));
                }

                fields.insert("current_price".into(), current.clone());
                fields.insert(
                    "pnl_percent".into(),
                    price.get("pnl_percent").cloned().unwrap_or(json!(0)),
                );
                fields.insert(
                    "exchange".into(),
                    price.get("exchange").cloned().unwrap_or(json!("Unknown")),
                );
            }
            (id.clone(), processed)
        })
        .collect()
}

fn to_datetime(ts: f64) -> Option<DateTime<chrono::Utc>> {
    let secs = ts.floor();
    let nanos = ((ts - secs) * 1e9) as u32;
    DateTime::from_timestamp(secs as i64, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-03-06 (Wednesday) 12:00:00 UTC
    const WED: f64 = 1_709_726_400.0;

    fn trade(source: &str, direction: &str, entry: f64, close: Option<f64>, ts: f64) -> Value {
        let mut t = json!({
            "source": source,
            "direction": direction,
            "entry_prices": [entry],
            "timestamp": ts,
        });
        if let Some(close) = close {
            t["close_price"] = json!(close);
            t["close_reason"] = json!("all_take_profits");
        }
        t
    }

    #[test]
    fn pnl_follows_direction() {
        let long = trade("a", "LONG", 100.0, Some(110.0), WED);
        let short = trade("a", "SHORT", 100.0, Some(110.0), WED);
        assert!((trade_pnl_percent(&long).unwrap() - 10.0).abs() < 1e-9);
        assert!((trade_pnl_percent(&short).unwrap() + 10.0).abs() < 1e-9);
        assert_eq!(trade_pnl_percent(&trade("a", "LONG", 100.0, None, WED)), None);
        assert_eq!(trade_pnl_percent(&trade("a", "LONG", 0.0, Some(1.0), WED)), None);
    }

    #[test]
    fn weekly_buckets_by_iso_week() {
        let history = vec![
            trade("alpha", "LONG", 100.0, Some(110.0), WED),
            trade("beta", "SHORT", 100.0, Some(105.0), WED + 3600.0),
            trade("alpha", "LONG", 100.0, None, WED + 7.0 * 86_400.0),
            json!({"source": "undated"}),
        ];

        let weeks = weekly_stats(&history);
        assert_eq!(weeks.len(), 2);

        let first = &weeks["2024-W10"];
        assert_eq!(first.week_start, "2024-03-04");
        assert_eq!(first.total_trades, 2);
        assert_eq!(first.profitable_trades, 1);
        assert_eq!(first.closed_trades, 2);
        assert_eq!(first.sources["alpha"], 1);
        assert_eq!(first.sources["beta"], 1);
        assert!((first.total_pnl - 5.0).abs() < 1e-9);

        let second = &weeks["2024-W11"];
        assert_eq!(second.active_trades, 1);
        assert_eq!(second.closed_trades, 0);
    }

    #[test]
    fn source_stats_respect_window_and_leverage() {
        let mut recent = trade("alpha", "LONG", 100.0, Some(120.0), WED);
        recent["leverage"] = json!(10);
        let mut unlevered = trade("alpha", "LONG", 100.0, Some(90.0), WED);
        unlevered["leverage"] = json!(0);
        let stale = trade("alpha", "LONG", 100.0, Some(120.0), WED - 8.0 * 86_400.0);

        let stats = source_stats(&[recent, unlevered, stale], WED + 60.0, SOURCE_STATS_DAYS);
        let alpha = &stats["alpha"];
        assert_eq!(alpha.total_trades, 2);
        assert_eq!(alpha.profitable_trades, 1);
        assert_eq!(alpha.leverage_count, 1);
        assert!((alpha.avg_leverage - 10.0).abs() < 1e-9);
        assert!((alpha.total_pnl - 10.0).abs() < 1e-9);
    }

    #[test]
    fn history_query_filters_sorts_and_pages() {
        let mut history: Vec<Value> = (0..120)
            .map(|i| trade("alpha", "LONG", 1.0, None, WED + f64::from(i)))
            .collect();
        history.push(json!({"source": "beta", "timestamp": WED, "close_reason": "stop_loss"}));

        let page = query_history(&history, &HistoryQuery::default());
        assert_eq!(page.total_count, 121);
        assert_eq!(page.history.len(), HISTORY_PAGE_SIZE);
        assert_eq!(page.history[0]["timestamp"], json!(WED + 119.0));

        let last = query_history(
            &history,
            &HistoryQuery {
                page: 3,
                ..HistoryQuery::default()
            },
        );
        assert_eq!(last.history.len(), 21);

        let stopped = query_history(
            &history,
            &HistoryQuery {
                status: HistoryStatus::Stopped,
                ..HistoryQuery::default()
            },
        );
        assert_eq!(stopped.total_count, 1);

        let alpha_active = query_history(
            &history,
            &HistoryQuery {
                source: Some("alpha".into()),
                status: HistoryStatus::from_param("active"),
                ..HistoryQuery::default()
            },
        );
        assert_eq!(alpha_active.total_count, 120);
        assert_eq!(HistoryStatus::from_param("bogus"), HistoryStatus::All);
    }

    #[test]
    fn huge_page_number_yields_empty_page() {
        let history = vec![trade("alpha", "LONG", 1.0, None, WED)];
        let page = query_history(
            &history,
            &HistoryQuery {
                page: usize::MAX,
                ..HistoryQuery::default()
            },
        );
        assert_eq!(page.total_count, 1);
        assert_eq!(page.page, usize::MAX);
        assert!(page.history.is_empty());
    }

    #[test]
    fn processed_signals_recompute_reached_take_profits() {
        let mut signals = Map::new();
        signals.insert(
            "long".into(),
            json!({"symbol": "BTCUSDT", "direction": "LONG", "take_profits": [100, 110, 120], "reached_tps": [0, 1, 2]}),
        );
        signals.insert(
            "short".into(),
            json!({"symbol": "ETHUSDT", "direction": "SHORT", "take_profits": [90, 80]}),
        );
        signals.insert("bare".into(), json!({"signal_id": "bare"}));

        let mut prices = Map::new();
        prices.insert("BTCUSDT".into(), json!({"current_price": 112, "pnl_percent": 3.5, "exchange": "Binance"}));
        prices.insert("ETHUSDT".into(), json!({"current_price": 85}));

        let processed = processed_signals(&signals, &prices);
        assert_eq!(processed["long"]["reached_tps"], json!([0, 1]));
        assert_eq!(processed["long"]["exchange"], json!("Binance"));
        assert_eq!(processed["short"]["reached_tps"], json!([0]));
        assert_eq!(processed["short"]["pnl_percent"], json!(0));
        assert_eq!(processed["short"]["exchange"], json!("Unknown"));
        assert_eq!(processed["bare"], json!({"signal_id": "bare"}));
    }

    #[test]
    fn non_numeric_price_still_enriches_signal() {
        let mut signals = Map::new();
        signals.insert(
            "sig".into(),
            json!({"symbol": "XRPUSDT", "direction": "LONG", "take_profits": [1.0], "reached_tps": [0]}),
        );
        let mut prices = Map::new();
        prices.insert(
            "XRPUSDT".into(),
            json!({"current_price": "0.61", "pnl_percent": 1.2, "exchange": "Bybit"}),
        );
        prices.insert("NULLUSDT".into(), json!({"current_price": null}));
        signals.insert("null".into(), json!({"symbol": "NULLUSDT"}));

        let processed = processed_signals(&signals, &prices);
        assert_eq!(processed["sig"]["current_price"], json!("0.61"));
        assert_eq!(processed["sig"]["pnl_percent"], json!(1.2));
        assert_eq!(processed["sig"]["exchange"], json!("Bybit"));
        assert_eq!(processed["sig"]["reached_tps"], json!([0]));
        assert_eq!(processed["null"], json!({"symbol": "NULLUSDT"}));
    }
}
