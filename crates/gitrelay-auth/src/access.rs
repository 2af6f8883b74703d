//! Access-control backends.
//!
//! The relay does not own users or grants. It asks an [`AccessControl`]
//! backend, either a remote HTTP service or a static list from the config.

use crate::error::{AuthError, Result};
use crate::permission::Permission;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Source of identities and repository permissions.
#[async_trait]
pub trait AccessControl: Send + Sync {
    /// Verifies credentials, returning the user id on success.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<String>>;

    /// Permission of `user` on the repository `repo` (`owner/name`), if any.
    async fn permission(&self, user: &str, repo: &str) -> Result<Option<Permission>>;
}

/// A user of the static access list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticUser {
    pub username: String,
    pub password: String,
    /// Repository pattern to permission. Patterns are `owner/name`,
    /// `owner/*` or `*`.
    #[serde(default)]
    pub repos: HashMap<String, Permission>,
}

/// Access list held in memory, loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticAccessControl {
    users: HashMap<String, StaticUser>,
}

impl StaticAccessControl {
    pub fn new(users: impl IntoIterator<Item = StaticUser>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|u| (u.username.clone(), u))
                .collect(),
        }
    }

    /// Highest permission any matching pattern grants.
    fn lookup(&self, user: &str, repo: &str) -> Option<Permission> {
        let entry = self.users.get(user)?;
        let owner = repo.split_once('/').map(|(owner, _)| owner);
        entry
            .repos
            .iter()
            .filter(|(pattern, _)| {
                pattern.as_str() == "*"
                    || pattern.as_str() == repo
                    || pattern
                        .strip_suffix("/*")
                        .is_some_and(|p| Some(p) == owner)
            })
            .map(|(_, permission)| *permission)
            .max()
    }
}

#[async_trait]
impl AccessControl for StaticAccessControl {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<String>> {
        Ok(self
            .users
            .get(username)
            .filter(|u| constant_time_eq(u.password.as_bytes(), password.as_bytes()))
            .map(|u| u.username.clone()))
    }

    async fn permission(&self, user: &str, repo: &str) -> Result<Option<Permission>> {
        Ok(self.lookup(user, repo))
    }
}

/// Compares two secrets in time independent of where they differ.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Serialize)]
struct AuthenticateRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthenticateResponse {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct PermissionResponse {
    permission: Option<Permission>,
}

/// Backend asking a remote service over HTTP.
///
/// - `POST {endpoint}/authenticate` with `{"username","password"}` answers
///   `200 {"user_id"}` or `401`.
/// - `GET {endpoint}/permission?user=..&repo=..` answers
///   `200 {"permission": "read"|"write"|"admin"|null}` or `404`.
#[derive(Debug, Clone)]
pub struct HttpAccessControl {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAccessControl {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(AuthError::InvalidConfig(format!(
                "access control endpoint must be an http(s) URL: {endpoint}"
            )));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl AccessControl for HttpAccessControl {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<String>> {
        let response = self
            .client
            .post(format!("{}/authenticate", self.endpoint))
            .json(&AuthenticateRequest { username, password })
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(Some(response.json::<AuthenticateResponse>().await?.user_id)),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => Ok(None),
            s => Err(AuthError::Backend(format!("authenticate returned {s}"))),
        }
    }

    async fn permission(&self, user: &str, repo: &str) -> Result<Option<Permission>> {
        let response = self
            .client
            .get(format!("{}/permission", self.endpoint))
            .query(&[("user", user), ("repo", repo)])
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(response.json::<PermissionResponse>().await?.permission),
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            s => Err(AuthError::Backend(format!("permission returned {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    fn alice() -> StaticUser {
        StaticUser {
            username: "alice".into(),
            password: "s3cret".into(),
            repos: HashMap::from([
                ("alice/*".to_string(), Permission::Admin),
                ("bob/shared".to_string(), Permission::Write),
                ("*".to_string(), Permission::Read),
            ]),
        }
    }

    #[tokio::test]
    async fn test_static_authenticate() {
        let acl = StaticAccessControl::new([alice()]);
        assert_eq!(
            acl.authenticate("alice", "s3cret").await.unwrap(),
            Some("alice".to_string())
        );
        assert_eq!(acl.authenticate("alice", "wrong").await.unwrap(), None);
        assert_eq!(acl.authenticate("mallory", "s3cret").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_static_patterns() {
        let acl = StaticAccessControl::new([alice()]);
        assert_eq!(
            acl.permission("alice", "alice/site").await.unwrap(),
            Some(Permission::Admin)
        );
        assert_eq!(
            acl.permission("alice", "bob/shared").await.unwrap(),
            Some(Permission::Write)
        );
        assert_eq!(
            acl.permission("alice", "carol/x").await.unwrap(),
            Some(Permission::Read)
        );
        assert_eq!(acl.permission("bob", "bob/shared").await.unwrap(), None);
    }

    #[derive(Deserialize)]
    struct PermissionQuery {
        user: String,
        repo: String,
    }

    async fn spawn_backend() -> String {
        let app = Router::new()
            .route(
                "/authenticate",
                post(|Json(body): Json<serde_json::Value>| async move {
                    if body["password"] == "pw" {
                        Ok(Json(serde_json::json!({ "user_id": body["username"] })))
                    } else {
                        Err(StatusCode::UNAUTHORIZED)
                    }
                }),
            )
            .route(
                "/permission",
                get(|Query(q): Query<PermissionQuery>| async move {
                    match (q.user.as_str(), q.repo.as_str()) {
                        ("alice", "alice/site") => Ok(Json(serde_json::json!({ "permission": "write" }))),
                        ("alice", _) => Ok(Json(serde_json::json!({ "permission": null }))),
                        ("broken", _) => Err(StatusCode::INTERNAL_SERVER_ERROR),
                        _ => Err(StatusCode::NOT_FOUND),
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_http_backend() {
        let endpoint = spawn_backend().await;
        let acl = HttpAccessControl::new(endpoint, Duration::from_secs(5)).unwrap();

        assert_eq!(
            acl.authenticate("alice", "pw").await.unwrap(),
            Some("alice".to_string())
        );
        assert_eq!(acl.authenticate("alice", "nope").await.unwrap(), None);

        assert_eq!(
            acl.permission("alice", "alice/site").await.unwrap(),
            Some(Permission::Write)
        );
        assert_eq!(acl.permission("alice", "other/repo").await.unwrap(), None);
        assert_eq!(acl.permission("carol", "alice/site").await.unwrap(), None);
        assert!(matches!(
            acl.permission("broken", "alice/site").await,
            Err(AuthError::Backend(_))
        ));
    }

    proptest::proptest! {
        #[test]
        fn test_constant_time_eq_matches_eq(a in proptest::collection::vec(proptest::num::u8::ANY, 0..32),
                                            b in proptest::collection::vec(proptest::num::u8::ANY, 0..32)) {
            proptest::prop_assert_eq!(constant_time_eq(&a, &b), a == b);
            proptest::prop_assert!(constant_time_eq(&a, &a));
        }
    }

    #[test]
    fn test_http_backend_rejects_bad_endpoint() {
        assert!(matches!(
            HttpAccessControl::new("ftp://example.com", Duration::from_secs(1)),
            Err(AuthError::InvalidConfig(_))
        ));
    }
}
