//! Push event hooks.
//!
//! After a successful receive-pack, every ref update becomes a
//! [`PushEvent`] handed to each configured [`PushHook`]. Delivery is
//! fire-and-forget: hook failures are logged and never reach the client.

use async_trait::async_trait;
use gitrelay_git::PushEvent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Hook delivery failure.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook {url} returned {status}")]
    Status { url: String, status: u16 },
}

/// Receiver of push events.
#[async_trait]
pub trait PushHook: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Handles one ref update of `repo` (`owner/name`).
    async fn on_push(&self, repo: &str, event: &PushEvent) -> Result<(), HookError>;
}

/// Logs every push event.
#[derive(Debug, Default)]
pub struct LogPushHook;

#[async_trait]
impl PushHook for LogPushHook {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_push(&self, repo: &str, event: &PushEvent) -> Result<(), HookError> {
        tracing::info!(
            repo = %repo,
            git_ref = %event.ref_name,
            before = %event.before,
            after = %event.after,
            pusher = %event.pusher,
            commits = event.total_commits_count,
            is_tag = event.is_tag,
            is_delete = event.is_delete,
            "Push received"
        );
        Ok(())
    }
}

/// Repository information for webhook payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookRepository {
    /// Repository key, `owner/name`.
    pub key: String,
    pub name: String,
    pub owner: String,
}

impl WebhookRepository {
    fn from_key(key: &str) -> Self {
        let (owner, name) = key.split_once('/').unwrap_or(("", key));
        Self {
            key: key.to_string(),
            name: name.to_string(),
            owner: owner.to_string(),
        }
    }
}

/// Webhook delivery payload.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload<'a> {
    /// Always `push`.
    pub event: &'static str,
    /// Unique per delivery.
    pub delivery_id: String,
    pub repository: WebhookRepository,
    pub payload: &'a PushEvent,
    /// Unix seconds.
    pub timestamp: i64,
}

/// POSTs a JSON payload to a URL for every push event.
#[derive(Debug, Clone)]
pub struct WebhookPushHook {
    client: reqwest::Client,
    url: String,
}

impl WebhookPushHook {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, HookError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushHook for WebhookPushHook {
    fn name(&self) -> &str {
        &self.url
    }

    async fn on_push(&self, repo: &str, event: &PushEvent) -> Result<(), HookError> {
        let payload = WebhookPayload {
            event: "push",
            delivery_id: uuid::Uuid::new_v4().to_string(),
            repository: WebhookRepository::from_key(repo),
            payload: event,
            timestamp: chrono::Utc::now().timestamp(),
        };

        let response = self
            .client
            .post(&self.url)
            .header("X-Gitrelay-Event", "push")
            .header("X-Gitrelay-Delivery", payload.delivery_id.as_str())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HookError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Fans push events out to every hook.
#[derive(Default)]
pub struct HookDispatcher {
    hooks: Vec<Arc<dyn PushHook>>,
}

impl HookDispatcher {
    pub fn new(hooks: Vec<Arc<dyn PushHook>>) -> Self {
        Self { hooks }
    }

    /// The log hook plus one webhook per URL. Invalid URLs are skipped with
    /// an error log.
    pub fn from_urls(urls: &[String], timeout: Duration) -> Self {
        let mut hooks: Vec<Arc<dyn PushHook>> = vec![Arc::new(LogPushHook)];
        for url in urls {
            match WebhookPushHook::new(url.clone(), timeout) {
                Ok(hook) => hooks.push(Arc::new(hook)),
                Err(e) => tracing::error!(url = %url, error = %e, "Skipping webhook"),
            }
        }
        Self::new(hooks)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Spawns one delivery task per event per hook and returns immediately.
    pub fn dispatch(&self, repo: &str, events: Vec<PushEvent>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::with_capacity(events.len() * self.hooks.len());
        for event in events {
            let event = Arc::new(event);
            for hook in &self.hooks {
                let hook = hook.clone();
                let event = event.clone();
                let repo = repo.to_string();
                handles.push(tokio::spawn(async move {
                    if let Err(e) = hook.on_push(&repo, &event).await {
                        tracing::warn!(hook = hook.name(), repo = %repo, git_ref = %event.ref_name, error = %e, "Push hook failed");
                    }
                }));
            }
        }
        handles
    }
}

impl std::fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDispatcher")
            .field("hooks", &self.hooks.iter().map(|h| h.name()).collect::<Vec<_>>())
            .finish()
    }
}
