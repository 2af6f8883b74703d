//! Short-TTL cache of positive permission checks.

use crate::access::AccessControl;
use crate::error::Result;
use crate::permission::Permission;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default lifetime of a cached grant.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct CacheEntry {
    permission: Permission,
    expires_at: Instant,
}

/// Cache hit and miss totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Wraps an [`AccessControl`] backend with a per-(user, repo) grant cache.
///
/// Only grants are cached, and they are never invalidated early: a denial
/// or an expired entry always goes back to the backend, so a revocation
/// takes effect within one TTL. Backend errors are returned as-is and never
/// cached.
///
/// Expired entries are dropped when looked up, swept at most once per TTL
/// on insert, and periodically by [`spawn_cache_purge`].
pub struct AuthorizationCache {
    backend: Arc<dyn AccessControl>,
    ttl: Duration,
    entries: RwLock<HashMap<(String, String), CacheEntry>>,
    last_sweep: Mutex<Instant>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AuthorizationCache {
    pub fn new(backend: Arc<dyn AccessControl>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            entries: RwLock::new(HashMap::new()),
            last_sweep: Mutex::new(Instant::now()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &Arc<dyn AccessControl> {
        &self.backend
    }

    /// Whether `user` holds at least `required` on `repo`.
    pub async fn authorize(&self, user: &str, repo: &str, required: Permission) -> Result<bool> {
        if let Some(cached) = self.cached(user, repo) {
            if cached.has(required) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(true);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let live = self.backend.permission(user, repo).await?;
        let key = (user.to_string(), repo.to_string());
        match live {
            Some(permission) => {
                let now = Instant::now();
                let mut entries = self.entries.write();
                {
                    let mut last_sweep = self.last_sweep.lock();
                    if now.duration_since(*last_sweep) >= self.ttl {
                        entries.retain(|_, e| e.expires_at > now);
                        *last_sweep = now;
                    }
                }
                entries.insert(
                    key,
                    CacheEntry {
                        permission,
                        expires_at: now + self.ttl,
                    },
                );
                drop(entries);
                tracing::debug!(user, repo, permission = %permission, "Cached permission");
                Ok(permission.has(required))
            }
            None => {
                self.entries.write().remove(&key);
                Ok(false)
            }
        }
    }

    fn cached(&self, user: &str, repo: &str) -> Option<Permission> {
        let key = (user.to_string(), repo.to_string());
        let now = Instant::now();
        {
            let entries = self.entries.read();
            let entry = entries.get(&key)?;
            if entry.expires_at > now {
                return Some(entry.permission);
            }
        }
        let mut entries = self.entries.write();
        if entries.get(&key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(&key);
        }
        None
    }

    /// Drops expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.read().len(),
        }
    }
}

/// Runs [`AuthorizationCache::purge_expired`] every `interval` until cancelled.
pub fn spawn_cache_purge(
    cache: Arc<AuthorizationCache>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cache.purge_expired();
                    if removed > 0 {
                        tracing::debug!(removed, "Purged expired permissions");
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}

impl std::fmt::Debug for AuthorizationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCache")
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Backend answering from a mutable table and counting calls.
    #[derive(Default)]
    struct FakeBackend {
        grants: Mutex<HashMap<(String, String), Permission>>,
        fail: std::sync::atomic::AtomicBool,
        calls: AtomicU64,
    }

    impl FakeBackend {
        fn grant(&self, user: &str, repo: &str, permission: Permission) {
            self.grants
                .lock()
                .insert((user.into(), repo.into()), permission);
        }

        fn revoke(&self, user: &str, repo: &str) {
            self.grants.lock().remove(&(user.to_string(), repo.to_string()));
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AccessControl for FakeBackend {
        async fn authenticate(&self, username: &str, _password: &str) -> Result<Option<String>> {
            Ok(Some(username.to_string()))
        }

        async fn permission(&self, user: &str, repo: &str) -> Result<Option<Permission>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(AuthError::Backend("unavailable".into()));
            }
            Ok(self
                .grants
                .lock()
                .get(&(user.to_string(), repo.to_string()))
                .copied())
        }
    }

    #[tokio::test]
    async fn test_grant_is_reused_within_ttl() {
        let backend = Arc::new(FakeBackend::default());
        backend.grant("alice", "alice/site", Permission::Write);
        let cache = AuthorizationCache::new(backend.clone(), Duration::from_secs(60));

        assert!(cache.authorize("alice", "alice/site", Permission::Write).await.unwrap());
        assert!(cache.authorize("alice", "alice/site", Permission::Read).await.unwrap());
        assert_eq!(backend.calls(), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_denial_is_never_cached() {
        let backend = Arc::new(FakeBackend::default());
        let cache = AuthorizationCache::new(backend.clone(), Duration::from_secs(60));

        assert!(!cache.authorize("bob", "alice/site", Permission::Read).await.unwrap());
        assert!(!cache.authorize("bob", "alice/site", Permission::Read).await.unwrap());
        assert_eq!(backend.calls(), 2);

        backend.grant("bob", "alice/site", Permission::Read);
        assert!(cache.authorize("bob", "alice/site", Permission::Read).await.unwrap());
    }

    #[tokio::test]
    async fn test_insufficient_cached_grant_rechecks() {
        let backend = Arc::new(FakeBackend::default());
        backend.grant("alice", "r/x", Permission::Read);
        let cache = AuthorizationCache::new(backend.clone(), Duration::from_secs(60));

        assert!(!cache.authorize("alice", "r/x", Permission::Write).await.unwrap());
        backend.grant("alice", "r/x", Permission::Write);
        assert!(cache.authorize("alice", "r/x", Permission::Write).await.unwrap());
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_revocation_applies_after_expiry() {
        let backend = Arc::new(FakeBackend::default());
        backend.grant("alice", "r/x", Permission::Write);
        let cache = AuthorizationCache::new(backend.clone(), Duration::from_millis(50));

        assert!(cache.authorize("alice", "r/x", Permission::Write).await.unwrap());
        backend.revoke("alice", "r/x");
        assert!(cache.authorize("alice", "r/x", Permission::Write).await.unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!cache.authorize("alice", "r/x", Permission::Write).await.unwrap());
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_backend_error_fails_closed() {
        let backend = Arc::new(FakeBackend::default());
        backend.grant("alice", "r/x", Permission::Write);
        backend.fail.store(true, Ordering::SeqCst);
        let cache = AuthorizationCache::new(backend.clone(), Duration::from_secs(60));

        assert!(cache.authorize("alice", "r/x", Permission::Read).await.is_err());
        assert_eq!(cache.stats().entries, 0);

        backend.fail.store(false, Ordering::SeqCst);
        assert!(cache.authorize("alice", "r/x", Permission::Read).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let backend = Arc::new(FakeBackend::default());
        backend.grant("alice", "r/x", Permission::Read);
        backend.grant("alice", "r/y", Permission::Read);
        let cache = AuthorizationCache::new(backend, Duration::from_millis(10));

        cache.authorize("alice", "r/x", Permission::Read).await.unwrap();
        cache.authorize("alice", "r/y", Permission::Read).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_expired_entries_do_not_accumulate() {
        let backend = Arc::new(FakeBackend::default());
        for i in 0..1000 {
            backend.grant("alice", &format!("r/{i}"), Permission::Read);
        }
        backend.grant("alice", "r/last", Permission::Read);
        let cache = AuthorizationCache::new(backend, Duration::from_millis(1));

        for i in 0..1000 {
            assert!(cache.authorize("alice", &format!("r/{i}"), Permission::Read).await.unwrap());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(cache.authorize("alice", "r/last", Permission::Read).await.unwrap());
        assert_eq!(cache.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_expired_lookup_drops_entry() {
        let backend = Arc::new(FakeBackend::default());
        backend.grant("alice", "r/x", Permission::Read);
        let cache = AuthorizationCache::new(backend.clone(), Duration::from_millis(10));

        cache.authorize("alice", "r/x", Permission::Read).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.cached("alice", "r/x"), None);
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_purge_task_sweeps_until_cancelled() {
        let backend = Arc::new(FakeBackend::default());
        backend.grant("alice", "r/x", Permission::Read);
        let cache = Arc::new(AuthorizationCache::new(backend, Duration::from_millis(10)));
        cache.authorize("alice", "r/x", Permission::Read).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = spawn_cache_purge(cache.clone(), Duration::from_millis(5), cancel.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.stats().entries, 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
