//! Git smart HTTP handlers.
//!
//! `GET info/refs?service=git-<svc>` streams the ref advertisement and
//! `POST git-<svc>` streams a stateless RPC. Both run one git subprocess
//! whose stdout is relayed as the response body while it is produced. The
//! subprocess is killed when the client goes away.

use crate::api::{ApiError, AppState};
use crate::instrumentation::{RequestInstrumentation, RequestMeta};
use crate::observability::RequestId;
use axum::{
    body::Body,
    extract::{ConnectInfo, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use base64::Engine;
use futures::{StreamExt, TryStreamExt};
use gitrelay_auth::Permission;
use gitrelay_git::{
    parse_push_header, read_pkt_section, CaptureReader, GitError, GitProcess, InputSource,
    LimitedCapture, Phase, PushEvent, RefUpdate, Service,
};
use serde::Deserialize;
use std::io::{self, Cursor};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::CancellationToken;

/// Capacity of the pipe between the git pump and the response body.
const RESPONSE_PIPE_BYTES: usize = 64 * 1024;

/// Header carrying the client's protocol version request.
const GIT_PROTOCOL_HEADER: &str = "git-protocol";

#[derive(Debug, Deserialize)]
pub struct InfoRefsQuery {
    service: Option<String>,
}

/// A repository resolved on disk.
#[derive(Debug, Clone)]
pub struct RepoTarget {
    /// `owner/name`, without `.git`.
    pub key: String,
    pub path: PathBuf,
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('.')
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Maps `owner/name[.git]` to `<repos_root>/owner/name.git` (or
/// `<repos_root>/owner/name` when only that exists).
pub fn resolve_repo(root: &std::path::Path, owner: &str, repo: &str) -> Result<RepoTarget, ApiError> {
    let name = repo.strip_suffix(".git").unwrap_or(repo);
    if !valid_segment(owner) || !valid_segment(name) {
        return Err(ApiError::BadRequest(format!(
            "invalid repository name: {owner}/{repo}"
        )));
    }
    let key = format!("{owner}/{name}");

    let bare = root.join(owner).join(format!("{name}.git"));
    let plain = root.join(owner).join(name);
    let path = if bare.is_dir() {
        bare
    } else if plain.is_dir() {
        plain
    } else {
        return Err(ApiError::RepoNotFound(key));
    };
    Ok(RepoTarget { key, path })
}

/// Username and password of a `Basic` authorization header.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Authenticates the caller and checks `required` on `repo`.
///
/// Returns the user id, empty for anonymous reads.
async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    repo: &str,
    required: Permission,
) -> Result<String, ApiError> {
    let Some((username, password)) = basic_credentials(headers) else {
        if required == Permission::Read && state.anonymous_read {
            return Ok(String::new());
        }
        return Err(ApiError::Unauthorized);
    };

    let user = state
        .auth
        .backend()
        .authenticate(&username, &password)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    if !state.auth.authorize(&user, repo, required).await? {
        tracing::info!(user = %user, repo = %repo, required = %required, "Access denied");
        return Err(ApiError::Forbidden(repo.to_string()));
    }
    Ok(user)
}

fn required_permission(service: Service) -> Permission {
    match service {
        Service::UploadPack => Permission::Read,
        Service::ReceivePack => Permission::Write,
    }
}

fn header_str(headers: &HeaderMap, name: impl header::AsHeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn remote_ip(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}

fn request_meta(request: &Request, repo: &str, user_id: String) -> RequestMeta {
    let headers = request.headers();
    RequestMeta {
        correlation_id: request
            .extensions()
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        repo: repo.to_string(),
        protocol: header_str(headers, GIT_PROTOCOL_HEADER),
        remote_ip: remote_ip(request),
        user_agent: header_str(headers, header::USER_AGENT),
        user_id,
    }
}

fn git_protocol(headers: &HeaderMap) -> Option<String> {
    headers
        .get(GIT_PROTOCOL_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Work done after a successful receive-pack.
struct PushFollowup {
    state: AppState,
    repo: RepoTarget,
    updates: Vec<RefUpdate>,
    pusher: String,
}

impl PushFollowup {
    async fn run(self) {
        let mut events = Vec::with_capacity(self.updates.len());
        for update in &self.updates {
            let commits = match self.state.executor.count_commits(&self.repo.path, update).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(repo = %self.repo.key, git_ref = %update.ref_name, error = %e, "Commit count failed");
                    0
                }
            };
            events.push(PushEvent::new(update, self.pusher.clone(), commits));
        }
        self.state.hooks.dispatch(&self.repo.key, events);
    }
}

/// Streams `prefix` followed by the output of `process` as the response body.
///
/// The pump runs in its own task. Dropping the body (client disconnect)
/// cancels the pump, which kills the subprocess.
fn stream_response(
    content_type: &'static str,
    process: GitProcess,
    inputs: Vec<InputSource>,
    prefix: Option<Vec<u8>>,
    instrumentation: RequestInstrumentation,
    followup: Option<PushFollowup>,
) -> Result<Response, ApiError> {
    let (pipe_writer, pipe_reader) = tokio::io::duplex(RESPONSE_PIPE_BYTES);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    tokio::spawn(async move {
        let mut writer = instrumentation.counting_writer(pipe_writer);
        let result = async {
            if let Some(prefix) = prefix {
                writer
                    .write_all(&prefix)
                    .await
                    .map_err(|source| GitError::Stream {
                        direction: "stdout",
                        source,
                    })?;
            }
            process.pump(inputs, &mut writer, &cancel).await.map(|_| ())
        }
        .await;
        drop(writer);

        match &result {
            Ok(()) => {
                if let Some(followup) = followup {
                    tokio::spawn(followup.run());
                }
            }
            Err(e) => tracing::warn!(correlation_id = %instrumentation.correlation_id(), error = %e, "Git stream failed"),
        }
        instrumentation.finish(StatusCode::OK.as_u16(), result.as_ref().err());
    });

    let body = ReaderStream::new(pipe_reader).map(move |chunk| {
        let _keep = &guard;
        chunk
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Ref advertisement endpoint.
pub async fn info_refs(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<InfoRefsQuery>,
    request: Request,
) -> Result<Response, ApiError> {
    let service = query
        .service
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("service parameter required".into()))
        .and_then(|s| Service::parse(s).map_err(|e| ApiError::BadRequest(e.to_string())))?;
    let target = resolve_repo(&state.git.repos_root, &owner, &repo)?;
    let headers = request.headers().clone();
    let user_id = authorize(&state, &headers, &target.key, required_permission(service)).await?;

    let protocol = git_protocol(&headers);
    let instrumentation = RequestInstrumentation::begin(
        state.recorder.clone(),
        state.metrics.clone(),
        service,
        Phase::Advertise,
        request_meta(&request, &target.key, user_id),
    );

    let process = match state
        .executor
        .spawn(service, Phase::Advertise, &target.path, protocol.as_deref())
    {
        Ok(process) => process,
        Err(e) => {
            instrumentation.finish(StatusCode::INTERNAL_SERVER_ERROR.as_u16(), Some(&e));
            return Err(e.into());
        }
    };

    stream_response(
        service.advertisement_content_type(),
        process,
        Vec::new(),
        service.advertisement_preamble(protocol.as_deref()),
        instrumentation,
        None,
    )
}

/// Fetch RPC endpoint.
pub async fn upload_pack(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    request: Request,
) -> Result<Response, ApiError> {
    service_rpc(state, Service::UploadPack, owner, repo, request).await
}

/// Push RPC endpoint.
pub async fn receive_pack(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    request: Request,
) -> Result<Response, ApiError> {
    service_rpc(state, Service::ReceivePack, owner, repo, request).await
}

async fn service_rpc(
    state: AppState,
    service: Service,
    owner: String,
    repo: String,
    request: Request,
) -> Result<Response, ApiError> {
    let target = resolve_repo(&state.git.repos_root, &owner, &repo)?;
    let headers = request.headers().clone();
    let user_id = authorize(&state, &headers, &target.key, required_permission(service)).await?;

    let protocol = git_protocol(&headers);
    let mut instrumentation = RequestInstrumentation::begin(
        state.recorder.clone(),
        state.metrics.clone(),
        service,
        Phase::Rpc,
        request_meta(&request, &target.key, user_id.clone()),
    );

    let body = StreamReader::new(
        request
            .into_body()
            .into_data_stream()
            .map_err(io::Error::other),
    );
    let body = instrumentation.counting_reader(body);

    let mut inputs: Vec<InputSource> = Vec::with_capacity(2);
    let mut prefix = None;
    let mut followup = None;

    match service {
        Service::UploadPack => {
            let capture = Arc::new(LimitedCapture::new(state.git.command_capture_bytes));
            instrumentation.watch_command(capture.clone(), state.git.command_wait());
            inputs.push(Box::new(CaptureReader::new(body, capture)));
        }
        Service::ReceivePack => {
            let mut body = body;
            let section = match read_pkt_section(&mut body, state.git.max_push_header_bytes).await {
                Ok(section) => section,
                Err(e) => {
                    let err = GitError::Stream {
                        direction: "stdin",
                        source: e,
                    };
                    instrumentation.finish(StatusCode::BAD_REQUEST.as_u16(), Some(&err));
                    return Err(ApiError::BadRequest(err.to_string()));
                }
            };

            let header = parse_push_header(&section.bytes);
            tracing::debug!(
                repo = %target.key,
                updates = header.updates.len(),
                complete = section.complete,
                "Parsed push header"
            );
            prefix = header.branch_created_notice();
            followup = Some(PushFollowup {
                state: state.clone(),
                repo: target.clone(),
                updates: header.updates,
                pusher: user_id,
            });

            inputs.push(Box::new(Cursor::new(section.bytes)));
            inputs.push(Box::new(body));
        }
    }

    let process = match state
        .executor
        .spawn(service, Phase::Rpc, &target.path, protocol.as_deref())
    {
        Ok(process) => process,
        Err(e) => {
            instrumentation.finish(StatusCode::INTERNAL_SERVER_ERROR.as_u16(), Some(&e));
            return Err(e.into());
        }
    };

    stream_response(
        service.result_content_type(),
        process,
        inputs,
        prefix,
        instrumentation,
        followup,
    )
}
