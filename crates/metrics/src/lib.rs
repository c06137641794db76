use std::convert::Infallible;
use std::net::SocketAddr;

use anyhow::Result;
use hyper::{
    header::{HeaderValue, CONTENT_TYPE},
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder, TEXT_FORMAT};
use tracing::{info, warn};

/// Dashboard counters plus the registry they are exported from.
#[derive(Clone)]
pub struct MetricsHandle {
    registry: Registry,
    signal_updates: IntCounter,
    signal_updates_ignored: IntCounter,
    price_updates: IntCounter,
    http_requests: IntCounterVec,
    heartbeat: IntCounter,
}

impl MetricsHandle {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let signal_updates = IntCounter::new(
            "dashboard_signal_updates_total",
            "Signal records accepted into the dashboard state",
        )?;
        let signal_updates_ignored = IntCounter::new(
            "dashboard_signal_updates_ignored_total",
            "Signal records dropped for lacking a signal_id",
        )?;
        let price_updates = IntCounter::new(
            "dashboard_price_updates_total",
            "Price records written into the dashboard state",
        )?;
        let http_requests = IntCounterVec::new(
            Opts::new("dashboard_http_requests_total", "Dashboard HTTP requests by route"),
            &["path"],
        )?;
        let heartbeat = IntCounter::new("dashboard_heartbeat_total", "Daemon liveness ticks")?;

        registry.register(Box::new(signal_updates.clone()))?;
        registry.register(Box::new(signal_updates_ignored.clone()))?;
        registry.register(Box::new(price_updates.clone()))?;
        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(heartbeat.clone()))?;

        Ok(Self {
            registry,
            signal_updates,
            signal_updates_ignored,
            price_updates,
            http_requests,
            heartbeat,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn signal_updated(&self, accepted: bool) {
        if accepted {
            self.signal_updates.inc();
        } else {
            self.signal_updates_ignored.inc();
        }
    }

    pub fn price_updated(&self) {
        self.price_updates.inc();
    }

    pub fn http_request(&self, path: &str) {
        self.http_requests.with_label_values(&[path]).inc();
    }

    pub fn heartbeat_counter(&self) -> IntCounter {
        self.heartbeat.clone()
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let make_svc = make_service_fn(move |_| {
            let metrics = self.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |_req: Request<Body>| {
                    let metrics = metrics.clone();
                    async move { Ok::<_, Infallible>(metrics.exposition()) }
                }))
            }
        });

        let server = Server::try_bind(&addr)?.serve(make_svc);
        info!(addr = %server.local_addr(), "metrics exporter listening");
        server.await?;
        Ok(())
    }

    fn exposition(&self) -> Response<Body> {
        match self.render() {
            Ok(buffer) => {
                let mut response = Response::new(Body::from(buffer));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
                response
            }
            Err(err) => {
                warn!(error = ?err, "failed to encode metrics");
                let mut response = Response::new(Body::from("metrics encoding failed"));
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
        }
    }
}
