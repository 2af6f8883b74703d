//! # Observability Module
//!
//! - **Structured Logging**: pretty or JSON logs with request IDs
//! - **Prometheus Metrics**: HTTP and git RPC metrics
//! - **Request Tracing**: request ID propagation, reused as the git telemetry
//!   correlation id
//!
//! ## Usage
//!
//! ```rust,ignore
//! use axum::Router;
//! use gitrelay_node::observability::{init_logging, LogFormat, MetricsState, request_id_middleware};
//!
//! init_logging("info", LogFormat::Json);
//! let metrics = MetricsState::new();
//!
//! let app: Router<()> = Router::new()
//!     .layer(axum::middleware::from_fn(request_id_middleware));
//! ```

mod logging;
mod metrics;
pub mod middleware;

pub use logging::{default_directives, init_logging, LogFormat};
pub use metrics::{MetricsState, RpcOutcome};
pub use middleware::{
    metrics_handler, metrics_middleware, request_id_middleware, RequestId, REQUEST_ID_HEADER,
};
