//! Authorization for gitrelay.
//!
//! This crate provides:
//! - **Permissions**: repository access levels (Read, Write, Admin)
//! - **Access control backends**: a remote HTTP service or a static list
//! - **Authorization cache**: short-lived reuse of positive permission checks
//!
//! # Example
//!
//! ```
//! use gitrelay_auth::{AuthorizationCache, Permission, StaticAccessControl, StaticUser};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Runtime::new().unwrap();
//! # rt.block_on(async {
//! let acl = StaticAccessControl::new([StaticUser {
//!     username: "alice".into(),
//!     password: "secret".into(),
//!     repos: HashMap::from([("alice/*".to_string(), Permission::Write)]),
//! }]);
//! let cache = AuthorizationCache::new(Arc::new(acl), Duration::from_secs(30));
//!
//! assert!(cache.authorize("alice", "alice/site", Permission::Write).await.unwrap());
//! assert!(!cache.authorize("alice", "bob/site", Permission::Read).await.unwrap());
//! # });
//! # }
//! ```

mod access;
mod cache;
mod error;
mod permission;

pub use access::{
    constant_time_eq, AccessControl, HttpAccessControl, StaticAccessControl, StaticUser,
};
pub use cache::{spawn_cache_purge, AuthorizationCache, CacheStats, DEFAULT_CACHE_TTL};
pub use error::{AuthError, Result};
pub use permission::Permission;
