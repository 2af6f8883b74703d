//! Node configuration.
//!
//! Loaded from an optional YAML file layered under `GITRELAY__`-prefixed
//! environment variables, e.g. `GITRELAY__METRICS__QUEUE_SIZE=1024`.

use config::{Config, ConfigError, Environment, File, FileFormat};
use gitrelay_auth::StaticUser;
use gitrelay_telemetry::MetricsConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the relay node.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    pub server: ServerConfig,
    pub git: GitConfig,
    /// Loaded leniently; see [`NodeConfig::load`].
    #[serde(skip_deserializing)]
    pub metrics: MetricsConfig,
    pub auth: AuthConfig,
    pub hooks: HooksConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub addr: SocketAddr,
    /// Directory for node state: admin token and default metrics location.
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl ServerConfig {
    /// Location of the persisted admin token.
    pub fn admin_token_path(&self) -> PathBuf {
        self.data_dir.join("admin_token")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitConfig {
    /// Git binary to execute.
    pub binary: PathBuf,
    /// Root holding `<owner>/<name>.git` bare repositories.
    pub repos_root: PathBuf,
    /// Upload-pack request bytes kept for command decoding.
    pub command_capture_bytes: usize,
    /// How long command decoding waits for the request section.
    pub command_wait_ms: u64,
    /// Largest receive-pack command section parsed for push events.
    pub max_push_header_bytes: usize,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("git"),
            repos_root: PathBuf::from("./repos"),
            command_capture_bytes: gitrelay_git::DEFAULT_CAPTURE_BYTES,
            command_wait_ms: 2000,
            max_push_header_bytes: 1024 * 1024,
        }
    }
}

impl GitConfig {
    pub fn command_wait(&self) -> Duration {
        Duration::from_millis(self.command_wait_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Lifetime of cached permission grants.
    pub cache_ttl_secs: u64,
    /// Remote access-control service; the static `users` list is used when unset.
    pub endpoint: Option<String>,
    /// Timeout for access-control requests.
    pub timeout_ms: u64,
    /// Allow fetches without credentials.
    pub anonymous_read: bool,
    pub users: Vec<StaticUser>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30,
            endpoint: None,
            timeout_ms: 5000,
            anonymous_read: false,
            users: Vec::new(),
        }
    }
}

impl AuthConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HooksConfig {
    /// URLs receiving a JSON payload per pushed ref.
    pub webhooks: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            webhooks: Vec::new(),
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl NodeConfig {
    /// Loads `path` (if it exists) and the environment.
    ///
    /// The `metrics` section never fails the load: unreadable or zero values
    /// fall back to defaults with a warning.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(false));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("GITRELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Self::from_settings(&settings)
    }

    /// Parses a YAML document, without consulting the environment.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        Self::from_settings(&settings)
    }

    fn from_settings(settings: &Config) -> Result<Self, ConfigError> {
        let mut config: NodeConfig = settings.clone().try_deserialize()?;
        config.metrics = match settings.get::<MetricsConfig>("metrics") {
            Ok(metrics) => metrics,
            Err(ConfigError::NotFound(_)) => MetricsConfig::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Invalid metrics configuration, using defaults");
                MetricsConfig::default()
            }
        }
        .sanitized();
        Ok(config)
    }

    /// Metrics destination with the data directory default applied.
    pub fn metrics_destination(&self) -> PathBuf {
        self.metrics.destination_or_default(&self.server.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitrelay_auth::Permission;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::from_yaml("{}").unwrap();
        assert_eq!(config.server.addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.git.command_capture_bytes, 64 * 1024);
        assert_eq!(config.git.command_wait(), Duration::from_secs(2));
        assert_eq!(config.auth.cache_ttl(), Duration::from_secs(30));
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics_destination(), PathBuf::from("./data/git-metrics"));
        assert_eq!(
            config.server.admin_token_path(),
            PathBuf::from("./data/admin_token")
        );
    }

    #[test]
    fn test_yaml_sections() {
        let config = NodeConfig::from_yaml(
            r#"
server:
  addr: "0.0.0.0:9999"
  data_dir: /var/lib/gitrelay
git:
  repos_root: /srv/git
metrics:
  destination: /var/log/gitrelay/events.jsonl
  queue_size: 0
  retention_days: 14
auth:
  anonymous_read: true
  users:
    - username: alice
      password: secret
      repos:
        "alice/*": admin
logging:
  format: json
"#,
        )
        .unwrap();

        assert_eq!(config.server.addr.port(), 9999);
        assert_eq!(config.git.repos_root, PathBuf::from("/srv/git"));
        assert_eq!(config.metrics.queue_size, gitrelay_telemetry::DEFAULT_QUEUE_SIZE);
        assert_eq!(config.metrics.retention_days, 14);
        assert_eq!(
            config.metrics_destination(),
            PathBuf::from("/var/log/gitrelay/events.jsonl")
        );
        assert!(config.auth.anonymous_read);
        assert_eq!(config.auth.users[0].repos["alice/*"], Permission::Admin);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_invalid_metrics_section_is_not_fatal() {
        let config = NodeConfig::from_yaml(
            r#"
metrics:
  queue_size: "lots"
"#,
        )
        .unwrap();
        assert_eq!(config.metrics.queue_size, gitrelay_telemetry::DEFAULT_QUEUE_SIZE);
    }
}
