//! Admin reporting endpoint.
//!
//! `GET /_admin/git-metrics` returns counters, in-flight RPCs and the
//! summary of one day of events. Access requires the bearer token persisted
//! at `<data_dir>/admin_token`, generated on first start.

use crate::api::{ApiError, AppState};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use chrono::NaiveDate;
use gitrelay_auth::constant_time_eq;
use gitrelay_git::{Phase, Service};
use gitrelay_telemetry::{ActiveFilter, MetricsReport};
use serde::Deserialize;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

/// Default number of in-flight tasks listed.
pub const DEFAULT_ACTIVE_LIMIT: usize = 50;
/// Default number of repositories per top list.
pub const DEFAULT_TOP_N: usize = 10;

/// Shared secret guarding the admin endpoint.
#[derive(Clone)]
pub struct AdminToken(String);

impl AdminToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Reads the token at `path`, creating it when missing or empty.
    ///
    /// A new file is created owner-only (0600 on unix) from the start.
    pub fn load_or_create(path: &Path) -> io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(existing) if !existing.trim().is_empty() => {
                return Ok(Self(existing.trim().to_string()));
            }
            Ok(_) => std::fs::remove_file(path)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let token = uuid::Uuid::new_v4().simple().to_string();
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(format!("{token}\n").as_bytes())?;
        file.sync_all()?;
        tracing::info!(path = %path.display(), "Generated admin token");
        Ok(Self(token))
    }

    pub fn verify(&self, candidate: &str) -> bool {
        constant_time_eq(self.0.as_bytes(), candidate.as_bytes())
    }
}

impl std::fmt::Debug for AdminToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminToken(..)")
    }
}

/// Query parameters of the report endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    pub limit: Option<usize>,
    pub min_duration_ms: Option<u64>,
    pub service: Option<String>,
    pub phase: Option<String>,
    pub top: Option<usize>,
    /// `YYYY-MM-DD`, defaults to today (UTC).
    pub date: Option<NaiveDate>,
}

impl ReportQuery {
    fn filter(&self) -> Result<ActiveFilter, ApiError> {
        let service = self
            .service
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| Service::parse(s).map_err(|e| ApiError::BadRequest(e.to_string())))
            .transpose()?;
        let phase = self
            .phase
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| {
                Phase::parse(s).ok_or_else(|| ApiError::BadRequest(format!("unknown phase: {s}")))
            })
            .transpose()?;

        Ok(ActiveFilter {
            limit: self.limit.unwrap_or(DEFAULT_ACTIVE_LIMIT),
            min_duration: Duration::from_millis(self.min_duration_ms.unwrap_or(0)),
            service,
            phase,
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Git metrics report.
pub async fn git_metrics_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ReportQuery>,
) -> Result<Json<MetricsReport>, ApiError> {
    match bearer_token(&headers) {
        Some(token) if state.admin_token.verify(token) => {}
        _ => return Err(ApiError::InvalidToken),
    }

    let filter = query.filter()?;
    let date = query.date.unwrap_or_else(|| chrono::Utc::now().date_naive());
    let top_n = query.top.unwrap_or(DEFAULT_TOP_N);

    let recorder = state.recorder.clone();
    let report = tokio::task::spawn_blocking(move || recorder.report(&filter, date, top_n))
        .await
        .map_err(|e| ApiError::Internal(format!("report task failed: {e}")))?;
    Ok(Json(report))
}
