use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub logging: LoggingConfig,
    pub relay: RelayConfig,
    pub destination: DestinationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

/// Redis connection for durable session records.
///
/// An empty `url` selects the in-memory store; sessions are then lost on restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            key_prefix: "hlsbridge:".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Tuning for the per-stream relay actors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Delay between two manifest polls of one stream
    pub tick_interval_ms: u64,
    /// Upper bound on segments forwarded by a single tick (0 = unlimited)
    pub max_segments_per_tick: usize,
    /// Extra attempts for a segment download or upload inside one tick
    pub segment_retry_attempts: usize,
    /// First backoff delay for in-tick retries
    pub retry_base_delay_ms: u64,
    /// Consecutive manifest failures before a session is marked failed (0 = never)
    pub max_consecutive_manifest_failures: u32,
    /// Number of trailing segments the dedup ledger remembers by URL
    pub dedup_window: u64,
    /// Timeout applied to every outbound HTTP request
    pub request_timeout_secs: u64,
    /// Bounded mailbox size of each relay actor
    pub mailbox_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 2000,
            max_segments_per_tick: 32,
            segment_retry_attempts: 2,
            retry_base_delay_ms: 250,
            max_consecutive_manifest_failures: 150,
            dedup_window: 512,
            request_timeout_secs: 15,
            mailbox_capacity: 64,
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    #[must_use]
    pub const fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Destination platform (resumable upload API) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    pub api_base_url: String,
    /// Fallback credentials when a start request carries none
    pub token_id: Option<String>,
    pub token_secret: Option<String>,
    pub cors_origin: String,
    pub playback_policy: String,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.mux.com".to_string(),
            token_id: None,
            token_secret: None,
            cors_origin: "*".to_string(),
            playback_policy: "public".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // HLSBRIDGE_RELAY__TICK_INTERVAL_MS, HLSBRIDGE_REDIS__URL, ...
        builder = builder.add_source(
            Environment::with_prefix("HLSBRIDGE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check the whole configuration, collecting every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }
        if self.relay.tick_interval_ms == 0 {
            errors.push("relay.tick_interval_ms must be non-zero".to_string());
        }
        if self.relay.mailbox_capacity == 0 {
            errors.push("relay.mailbox_capacity must be non-zero".to_string());
        }
        if self.relay.request_timeout_secs == 0 {
            errors.push("relay.request_timeout_secs must be non-zero".to_string());
        }
        match url::Url::parse(&self.destination.api_base_url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            Ok(u) => errors.push(format!(
                "destination.api_base_url has unsupported scheme \"{}\"",
                u.scheme()
            )),
            Err(e) => errors.push(format!("destination.api_base_url is invalid: {e}")),
        }
        if self.destination.token_id.is_some() != self.destination.token_secret.is_some() {
            errors.push(
                "destination.token_id and destination.token_secret must be set together"
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert!(config.redis.url.is_empty());
        assert_eq!(config.relay.tick_interval(), Duration::from_secs(2));
        assert_eq!(config.http_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.server.http_port = 0;
        config.logging.format = "xml".to_string();
        config.relay.tick_interval_ms = 0;
        config.destination.api_base_url = "ftp://example.com".to_string();
        config.destination.token_id = Some("id".to_string());

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.iter().any(|e| e.contains("http_port")));
        assert!(errors.iter().any(|e| e.contains("unsupported scheme")));
        assert!(errors.iter().any(|e| e.contains("set together")));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::from_file("/nonexistent/hlsbridge.yaml").unwrap();
        assert_eq!(config.relay.dedup_window, RelayConfig::default().dedup_window);
    }
}
