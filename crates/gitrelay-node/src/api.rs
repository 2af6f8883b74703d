//! HTTP API for the gitrelay node.
//!
//! Serves the git smart HTTP endpoints plus health, Prometheus and admin
//! reporting routes.

use crate::admin::{self, AdminToken};
use crate::config::{GitConfig, NodeConfig};
use crate::hooks::HookDispatcher;
use crate::observability::{
    metrics_handler, metrics_middleware, request_id_middleware, MetricsState,
};
use crate::smart_http;
use axum::{
    extract::FromRef,
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use gitrelay_auth::{
    AccessControl, AuthError, AuthorizationCache, HttpAccessControl, StaticAccessControl,
};
use gitrelay_git::{GitError, GitProcessExecutor, ProcessTracker};
use gitrelay_telemetry::MetricsRecorder;
use serde::Serialize;
use std::sync::Arc;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Repository location and request parsing limits.
    pub git: Arc<GitConfig>,
    pub executor: GitProcessExecutor,
    /// Git RPC telemetry.
    pub recorder: Arc<MetricsRecorder>,
    pub auth: Arc<AuthorizationCache>,
    /// Whether fetches are allowed without credentials.
    pub anonymous_read: bool,
    pub hooks: Arc<HookDispatcher>,
    pub admin_token: Arc<AdminToken>,
    /// Prometheus metrics.
    pub metrics: MetricsState,
}

impl FromRef<AppState> for MetricsState {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}

impl AppState {
    /// Builds the state described by `config`.
    ///
    /// Loads (or creates) the admin token and connects the access-control
    /// backend; `recorder` and `tracker` are owned by the caller so their
    /// background tasks can be shut down.
    pub fn from_config(
        config: &NodeConfig,
        recorder: Arc<MetricsRecorder>,
        tracker: ProcessTracker,
    ) -> anyhow::Result<Self> {
        let backend: Arc<dyn AccessControl> = match &config.auth.endpoint {
            Some(endpoint) => Arc::new(HttpAccessControl::new(
                endpoint.clone(),
                config.auth.timeout(),
            )?),
            None => Arc::new(StaticAccessControl::new(config.auth.users.clone())),
        };
        let admin_token = AdminToken::load_or_create(&config.server.admin_token_path())?;

        Ok(Self {
            git: Arc::new(config.git.clone()),
            executor: GitProcessExecutor::new(config.git.binary.clone(), tracker),
            recorder,
            auth: Arc::new(AuthorizationCache::new(backend, config.auth.cache_ttl())),
            anonymous_read: config.auth.anonymous_read,
            hooks: Arc::new(HookDispatcher::from_urls(
                &config.hooks.webhooks,
                std::time::Duration::from_millis(config.hooks.timeout_ms),
            )),
            admin_token: Arc::new(admin_token),
            metrics: MetricsState::new(),
        })
    }
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("repository not found: {0}")]
    RepoNotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("invalid or missing admin token")]
    InvalidToken,
    #[error("permission denied: {0}")]
    Forbidden(String),
    #[error("git error: {0}")]
    Git(#[from] GitError),
    #[error("authorization backend error: {0}")]
    Auth(#[from] AuthError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RepoNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized | ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Git(_) | ApiError::Auth(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });

        match self {
            ApiError::Unauthorized => (
                status,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"gitrelay\"")],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Creates the API router.
pub fn create_router(state: AppState) -> Router {
    let metrics = state.metrics.clone();
    Router::new()
        // Health check
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/_admin/git-metrics", get(admin::git_metrics_report))
        // Git smart HTTP protocol
        .route("/{owner}/{repo}/info/refs", get(smart_http::info_refs))
        .route("/{owner}/{repo}/git-upload-pack", post(smart_http::upload_pack))
        .route(
            "/{owner}/{repo}/git-receive-pack",
            post(smart_http::receive_pack),
        )
        .layer(RequestDecompressionLayer::new())
        .layer(middleware::from_fn_with_state(metrics, metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(ApiError::RepoNotFound("a/b".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden("a/b".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::Auth(AuthError::Backend("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Git(GitError::Cancelled).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unauthorized_challenges() {
        let response = ApiError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            "Basic realm=\"gitrelay\""
        );

        let response = ApiError::InvalidToken.into_response();
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }
}
