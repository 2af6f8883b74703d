//! Prometheus metrics collection.
//!
//! Provides metrics for:
//! - HTTP request latency and counts
//! - Git RPC outcomes and transferred bytes

use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// HTTP request labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    /// HTTP method (GET, POST, etc.)
    pub method: String,
    /// Matched route template
    pub path: String,
    /// Response status code
    pub status: u16,
}

/// How a git RPC ended.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum RpcOutcome {
    Ok,
    Error,
    Cancelled,
}

/// Git RPC labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RpcLabels {
    pub service: String,
    pub phase: String,
    pub outcome: RpcOutcome,
}

/// Git byte transfer labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BytesLabels {
    pub service: String,
    /// `in` (client to git) or `out`.
    pub direction: String,
}

/// Metrics state container, owned by the application state.
#[derive(Clone)]
pub struct MetricsState {
    /// Prometheus registry.
    pub registry: Arc<RwLock<Registry>>,
    /// HTTP request counter.
    pub http_requests_total: Family<HttpLabels, Counter>,
    /// HTTP request duration histogram (seconds).
    pub http_request_duration_seconds: Family<HttpLabels, Histogram>,
    /// HTTP requests in flight.
    pub http_active_connections: Gauge,
    /// Completed git RPCs.
    pub git_rpc_total: Family<RpcLabels, Counter>,
    /// Git RPC duration histogram (seconds).
    pub git_rpc_duration_seconds: Family<RpcLabels, Histogram>,
    /// Bytes relayed to and from git.
    pub git_bytes_total: Family<BytesLabels, Counter>,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsState {
    /// Create a new metrics state with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_requests_total = Family::<HttpLabels, Counter>::default();
        registry.register(
            "gitrelay_http_requests",
            "Total HTTP requests",
            http_requests_total.clone(),
        );

        let http_request_duration_seconds =
            Family::<HttpLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 16))
            });
        registry.register(
            "gitrelay_http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_request_duration_seconds.clone(),
        );

        let http_active_connections = Gauge::default();
        registry.register(
            "gitrelay_http_active_connections",
            "Number of in-flight HTTP requests",
            http_active_connections.clone(),
        );

        let git_rpc_total = Family::<RpcLabels, Counter>::default();
        registry.register(
            "gitrelay_git_rpc",
            "Completed git RPCs by service, phase and outcome",
            git_rpc_total.clone(),
        );

        let git_rpc_duration_seconds = Family::<RpcLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.01, 2.0, 16))
        });
        registry.register(
            "gitrelay_git_rpc_duration_seconds",
            "Git RPC duration in seconds",
            git_rpc_duration_seconds.clone(),
        );

        let git_bytes_total = Family::<BytesLabels, Counter>::default();
        registry.register(
            "gitrelay_git_bytes",
            "Bytes relayed between clients and git",
            git_bytes_total.clone(),
        );

        Self {
            registry: Arc::new(RwLock::new(registry)),
            http_requests_total,
            http_request_duration_seconds,
            http_active_connections,
            git_rpc_total,
            git_rpc_duration_seconds,
            git_bytes_total,
        }
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let labels = HttpLabels {
            method: method.to_string(),
            path: path.to_string(),
            status,
        };

        self.http_requests_total.get_or_create(&labels).inc();
        self.http_request_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a finished git RPC.
    pub fn record_git_rpc(
        &self,
        service: &str,
        phase: &str,
        outcome: RpcOutcome,
        duration_secs: f64,
        bytes_in: u64,
        bytes_out: u64,
    ) {
        let labels = RpcLabels {
            service: service.to_string(),
            phase: phase.to_string(),
            outcome,
        };
        self.git_rpc_total.get_or_create(&labels).inc();
        self.git_rpc_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);

        for (direction, bytes) in [("in", bytes_in), ("out", bytes_out)] {
            self.git_bytes_total
                .get_or_create(&BytesLabels {
                    service: service.to_string(),
                    direction: direction.to_string(),
                })
                .inc_by(bytes);
        }
    }

    /// Encode metrics for Prometheus scraping.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        let registry = self.registry.read();
        prometheus_client::encoding::text::encode(&mut buffer, &registry)?;
        Ok(buffer)
    }
}
