//! Request routing and handlers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response, StatusCode};
use metrics::MetricsHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use state::stats::{self, SourceStats, WeeklyStats, SOURCE_STATS_DAYS};
use state::{now_secs, HistoryQuery, HistoryStatus, TradingState};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const INDEX_HTML: &str = include_str!("../static/index.html");
const STATS_HTML: &str = include_str!("../static/stats.html");

/// Everything a request handler may touch.
#[derive(Clone)]
pub struct AppContext {
    pub state: Arc<TradingState>,
    pub metrics: Option<MetricsHandle>,
    pub started: Instant,
}

impl AppContext {
    pub fn new(state: Arc<TradingState>, metrics: Option<MetricsHandle>) -> Self {
        Self {
            state,
            metrics,
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub weekly_stats: BTreeMap<String, WeeklyStats>,
    pub source_stats: BTreeMap<String, SourceStats>,
    pub total_history_trades: usize,
    pub last_update: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Raw `/api/history` query string; every field is optional and lenient.
#[derive(Debug, Default)]
struct HistoryParams {
    page: Option<String>,
    source: Option<String>,
    status: Option<String>,
}

impl HistoryParams {
    /// Decodes the pairs one by one so a repeated or unknown key cannot
    /// discard the others. The first occurrence of each key wins.
    fn parse(query: Option<&str>) -> Self {
        let pairs: Vec<(String, String)> =
            match serde_urlencoded::from_str(query.unwrap_or_default()) {
                Ok(pairs) => pairs,
                Err(err) => {
                    debug!(error = %err, "unparseable history query ignored");
                    Vec::new()
                }
            };

        let mut params = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "page" => &mut params.page,
                "source" => &mut params.source,
                "status" => &mut params.status,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        params
    }

    fn into_query(self) -> HistoryQuery {
        HistoryQuery {
            page: self
                .page
                .and_then(|p| p.trim().parse::<usize>().ok())
                .unwrap_or(1)
                .max(1),
            source: self.source.filter(|s| !s.is_empty()),
            status: self
                .status
                .as_deref()
                .map(HistoryStatus::from_param)
                .unwrap_or_default(),
        }
    }
}

pub async fn route(req: Request<Body>, ctx: AppContext) -> Result<Response<Body>, Infallible> {
    let path = req.uri().path().to_string();
    debug!(method = %req.method(), path = %path, "dashboard request");

    if req.method() != Method::GET && req.method() != Method::HEAD {
        return Ok(method_not_allowed());
    }

    let response = match path.as_str() {
        "/" => html(INDEX_HTML),
        "/stats" | "/history" => html(STATS_HTML),
        "/api/data" => json_response(&ctx.state.snapshot()),
        "/api/signals" => json_response(&ctx.state.processed_snapshot()),
        "/api/stats" => api_stats(&ctx.state),
        "/api/history" => api_history(&ctx.state, req.uri().query()),
        "/health" => health(&ctx),
        _ => {
            record(&ctx, "other");
            return Ok(error_response(StatusCode::NOT_FOUND, "not_found"));
        }
    };
    record(&ctx, &path);
    Ok(response)
}

fn record(ctx: &AppContext, path: &str) {
    if let Some(metrics) = &ctx.metrics {
        metrics.http_request(path);
    }
}

fn api_stats(state: &TradingState) -> Response<Body> {
    let history = state.trade_history();
    json_response(&StatsResponse {
        weekly_stats: stats::weekly_stats(&history),
        source_stats: stats::source_stats(&history, now_secs(), SOURCE_STATS_DAYS),
        total_history_trades: history.len(),
        last_update: state.last_update(),
    })
}

fn api_history(state: &TradingState, query: Option<&str>) -> Response<Body> {
    let query = HistoryParams::parse(query).into_query();
    json_response(&stats::query_history(&state.trade_history(), &query))
}

fn health(ctx: &AppContext) -> Response<Body> {
    json_response(&HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: ctx.started.elapsed().as_secs(),
    })
}

fn html(page: &'static str) -> Response<Body> {
    with_content_type(Response::new(Body::from(page)), "text/html; charset=utf-8")
}

pub fn json_response<T: Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => with_content_type(Response::new(Body::from(body)), "application/json"),
        Err(err) => {
            warn!(error = %err, "failed to serialize response");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}

fn error_response(status: StatusCode, error: &str) -> Response<Body> {
    let body = json!({ "error": error }).to_string();
    let mut response = with_content_type(Response::new(Body::from(body)), "application/json");
    *response.status_mut() = status;
    response
}

fn method_not_allowed() -> Response<Body> {
    let mut response = error_response(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed");
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
    response
}

fn with_content_type(mut response: Response<Body>, content_type: &'static str) -> Response<Body> {
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
