//! Consumer configuration.
//!
//! Durations are stored as milliseconds so the same struct reads naturally
//! from TOML or JSON files:
//!
//! ```toml
//! group = "billing"
//! namespace = "prod"
//! name_server_addr = "10.0.0.1:8081"
//! long_polling_timeout_ms = 20000
//!
//! [credentials]
//! access_key = "AK"
//! access_secret = "SK"
//!
//! [pull]
//! consume_from = "beginning"
//! batch_size = 64
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Access credentials used by the signer.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub access_secret: String,
    #[serde(default)]
    pub security_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("access_secret", &"<redacted>")
            .field("has_security_token", &self.security_token.is_some())
            .finish()
    }
}

/// Where a pull task starts when no explicit offset is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsumeFrom {
    Beginning,
    #[default]
    End,
    /// Milliseconds since the Unix epoch.
    Timestamp(u64),
}

impl ConsumeFrom {
    pub fn timestamp(time: SystemTime) -> Self {
        let millis = time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self::Timestamp(millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Consumer group name
    pub group: String,
    /// Namespace qualifying every topic and group reference
    #[serde(default)]
    pub namespace: String,
    /// Client identifier; generated at construction when absent
    #[serde(default)]
    pub client_id: Option<String>,
    /// Address answering route queries
    pub name_server_addr: String,
    /// Timeout for route, offset and heartbeat RPCs
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Timeout for pull RPCs; must exceed the pull await time
    #[serde(default = "default_long_polling_timeout_ms")]
    pub long_polling_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub pull: PullTaskConfig,
}

fn default_io_timeout_ms() -> u64 {
    3_000
}

fn default_long_polling_timeout_ms() -> u64 {
    15_000
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

/// Settings for [`crate::PullTask`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullTaskConfig {
    #[serde(default)]
    pub consume_from: ConsumeFrom,
    /// How long the broker may hold a pull open waiting for messages
    #[serde(default = "default_await_time_ms")]
    pub await_time_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: i32,
    /// Pulling pauses while this many messages sit undelivered
    #[serde(default = "default_max_cached_messages")]
    pub max_cached_messages: usize,
    /// Back-off after a failed or throttled pull
    #[serde(default = "default_pull_later_delay_ms")]
    pub pull_later_delay_ms: u64,
    /// A task that has not pulled for this long reports itself expired
    #[serde(default = "default_max_idle_ms")]
    pub max_idle_ms: u64,
}

fn default_await_time_ms() -> u64 {
    5_000
}

fn default_batch_size() -> i32 {
    32
}

fn default_max_cached_messages() -> usize {
    1024
}

fn default_pull_later_delay_ms() -> u64 {
    3_000
}

fn default_max_idle_ms() -> u64 {
    30_000
}

impl Default for PullTaskConfig {
    fn default() -> Self {
        Self {
            consume_from: ConsumeFrom::default(),
            await_time_ms: default_await_time_ms(),
            batch_size: default_batch_size(),
            max_cached_messages: default_max_cached_messages(),
            pull_later_delay_ms: default_pull_later_delay_ms(),
            max_idle_ms: default_max_idle_ms(),
        }
    }
}

impl PullTaskConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_consume_from(mut self, consume_from: ConsumeFrom) -> Self {
        self.consume_from = consume_from;
        self
    }

    pub fn with_await_time(mut self, await_time: Duration) -> Self {
        self.await_time_ms = await_time.as_millis() as u64;
        self
    }

    pub fn with_batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_cached_messages(mut self, max: usize) -> Self {
        self.max_cached_messages = max;
        self
    }

    pub fn with_pull_later_delay(mut self, delay: Duration) -> Self {
        self.pull_later_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle_ms = max_idle.as_millis() as u64;
        self
    }

    pub fn await_time(&self) -> Duration {
        Duration::from_millis(self.await_time_ms)
    }

    pub fn pull_later_delay(&self) -> Duration {
        Duration::from_millis(self.pull_later_delay_ms)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: String::new(),
            namespace: String::new(),
            client_id: None,
            name_server_addr: "127.0.0.1:8081".to_string(),
            io_timeout_ms: default_io_timeout_ms(),
            long_polling_timeout_ms: default_long_polling_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            credentials: None,
            pull: PullTaskConfig::default(),
        }
    }
}

impl ConsumerConfig {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_name_server(mut self, addr: impl Into<String>) -> Self {
        self.name_server_addr = addr.into();
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_long_polling_timeout(mut self, timeout: Duration) -> Self {
        self.long_polling_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_pull(mut self, pull: PullTaskConfig) -> Self {
        self.pull = pull;
        self
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn long_polling_timeout(&self) -> Duration {
        Duration::from_millis(self.long_polling_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Self = match ext {
            "toml" => toml::from_str(&content)
                .map_err(|e| ClientError::Config(format!("TOML parse error: {}", e)))?,
            "json" => serde_json::from_str(&content)
                .map_err(|e| ClientError::Config(format!("JSON parse error: {}", e)))?,
            _ => {
                return Err(ClientError::Config(format!(
                    "Unknown config file extension: {}",
                    ext
                )));
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.group.trim().is_empty() {
            return Err(ClientError::Config("group must not be empty".into()));
        }
        if self.name_server_addr.trim().is_empty() {
            return Err(ClientError::Config(
                "name_server_addr must not be empty".into(),
            ));
        }
        if self.io_timeout_ms == 0 {
            return Err(ClientError::Config("io_timeout_ms must be positive".into()));
        }
        if self.long_polling_timeout_ms <= self.pull.await_time_ms {
            return Err(ClientError::Config(format!(
                "long_polling_timeout_ms ({}) must exceed pull.await_time_ms ({})",
                self.long_polling_timeout_ms, self.pull.await_time_ms
            )));
        }
        if self.pull.batch_size <= 0 {
            return Err(ClientError::Config("pull.batch_size must be positive".into()));
        }
        if self.pull.max_cached_messages == 0 {
            return Err(ClientError::Config(
                "pull.max_cached_messages must be positive".into(),
            ));
        }
        Ok(())
    }
}

static CLIENT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a client identifier unique within this host:
/// `{host}@{pid}#{sequence}#{nanos}`.
pub fn generate_client_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let sequence = CLIENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}@{}#{}#{}", host, std::process::id(), sequence, nanos)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_defaults() {
        let config = ConsumerConfig::new("group-a");
        assert_eq!(config.io_timeout(), Duration::from_secs(3));
        assert_eq!(config.long_polling_timeout(), Duration::from_secs(15));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(config.pull.consume_from, ConsumeFrom::End);
        assert_eq!(config.pull.batch_size, 32);
        assert!(config.long_polling_timeout() > config.pull.await_time());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ConsumerConfig::new("g")
            .with_namespace("ns")
            .with_client_id("cid")
            .with_name_server("10.0.0.1:9876")
            .with_io_timeout(Duration::from_millis(500))
            .with_long_polling_timeout(Duration::from_secs(30))
            .with_pull(
                PullTaskConfig::new()
                    .with_batch_size(8)
                    .with_consume_from(ConsumeFrom::Beginning),
            );

        assert_eq!(config.namespace, "ns");
        assert_eq!(config.client_id.as_deref(), Some("cid"));
        assert_eq!(config.io_timeout_ms, 500);
        assert_eq!(config.long_polling_timeout_ms, 30_000);
        assert_eq!(config.pull.batch_size, 8);
        assert_eq!(config.pull.consume_from, ConsumeFrom::Beginning);
    }

    #[test]
    fn test_validate_rejects_empty_group() {
        assert!(matches!(
            ConsumerConfig::new("  ").validate(),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_short_long_poll() {
        let config = ConsumerConfig::new("g")
            .with_long_polling_timeout(Duration::from_secs(5))
            .with_pull(PullTaskConfig::new().with_await_time(Duration::from_secs(5)));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_toml_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("consumer.toml");

        let toml_content = r#"
group = "billing"
namespace = "prod"
name_server_addr = "10.0.0.1:8081"
long_polling_timeout_ms = 20000

[credentials]
access_key = "AK"
access_secret = "SK"

[pull]
consume_from = { timestamp = 1700000000000 }
batch_size = 64
"#;
        std::fs::write(&config_path, toml_content).unwrap();

        let config = ConsumerConfig::from_file(&config_path).unwrap();
        assert_eq!(config.group, "billing");
        assert_eq!(config.namespace, "prod");
        assert_eq!(config.io_timeout_ms, 3_000);
        assert_eq!(config.long_polling_timeout(), Duration::from_secs(20));
        assert_eq!(config.credentials.as_ref().unwrap().access_key, "AK");
        assert_eq!(
            config.pull.consume_from,
            ConsumeFrom::Timestamp(1_700_000_000_000)
        );
        assert_eq!(config.pull.batch_size, 64);
        assert_eq!(config.pull.pull_later_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_config_from_json_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("consumer.json");

        let json_content = r#"{
            "group": "audit",
            "name_server_addr": "127.0.0.1:8081",
            "client_id": "fixed-id",
            "pull": {"consume_from": "beginning", "max_cached_messages": 10}
        }"#;
        std::fs::write(&config_path, json_content).unwrap();

        let config = ConsumerConfig::from_file(&config_path).unwrap();
        assert_eq!(config.group, "audit");
        assert_eq!(config.client_id.as_deref(), Some("fixed-id"));
        assert_eq!(config.pull.consume_from, ConsumeFrom::Beginning);
        assert_eq!(config.pull.max_cached_messages, 10);
    }

    #[test]
    fn test_config_unknown_extension() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("consumer.yaml");
        std::fs::write(&config_path, "group: x").unwrap();

        assert!(matches!(
            ConsumerConfig::from_file(&config_path),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_file_config_is_validated() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("consumer.toml");
        std::fs::write(&config_path, "group = \"\"\nname_server_addr = \"a:1\"\n").unwrap();

        assert!(ConsumerConfig::from_file(&config_path).is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let credentials = Credentials {
            access_key: "AK".into(),
            access_secret: "very-secret".into(),
            security_token: None,
        };
        let rendered = format!("{:?}", credentials);
        assert!(rendered.contains("AK"));
        assert!(!rendered.contains("very-secret"));
    }

    #[test]
    fn test_generated_client_ids_are_unique() {
        let a = generate_client_id();
        let b = generate_client_id();
        assert_ne!(a, b);
        assert!(a.contains('@'));
    }

    #[test]
    fn test_consume_from_timestamp() {
        let time = UNIX_EPOCH + Duration::from_millis(1_234);
        assert_eq!(ConsumeFrom::timestamp(time), ConsumeFrom::Timestamp(1_234));
    }
}
