//! Configuration schema types.
//!
//! The `pipeline` section reuses [`PipelineConfig`](portcullis_middleware::PipelineConfig)
//! and the cache registry reuses [`CacheRegistry`](portcullis_cache::CacheRegistry);
//! the sections here cover the store and the ambient stack.

use portcullis_cache::CacheRegistry;
use portcullis_crypto::SecretConfig;
use portcullis_telemetry::{LogConfig, MetricsConfig};
use serde::{Deserialize, Serialize};

/// Which cache store backs the engine and the secret resolver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// In-process store; state is lost on restart.
    #[default]
    Memory,
    /// Redis, at [`StoreConfig::url`].
    Redis,
}

/// Cache store section.
///
/// # Example
///
/// ```
/// use portcullis_config::{StoreConfig, StoreKind};
///
/// let store: StoreConfig = toml::from_str(r#"
///     kind = "redis"
///     url = "redis://127.0.0.1:6379/0"
/// "#).unwrap();
/// assert_eq!(store.kind, StoreKind::Redis);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Store backend.
    #[serde(default)]
    pub kind: StoreKind,

    /// Connection URL; required for Redis.
    #[serde(default)]
    pub url: Option<String>,
}

/// Cache section: the rebuild registry and secret caching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    /// Cache entries by index.
    #[serde(default)]
    pub registry: CacheRegistry,

    /// Secret material caching.
    #[serde(default)]
    pub secrets: SecretConfig,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines.
    #[default]
    Json,
    /// Human-readable.
    Pretty,
}

/// Logging section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Level or filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// ANSI colors (pretty format only).
    #[serde(default)]
    pub ansi_enabled: bool,

    /// Include file and line.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::Json,
            ansi_enabled: false,
            include_location: false,
        }
    }
}

impl LoggingSection {
    /// Converts to the telemetry crate's configuration.
    #[must_use]
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            enabled: self.enabled,
            level: self.level.clone(),
            json_format: self.format == LogFormat::Json,
            span_events: false,
            file_line_info: self.include_location,
            ansi: self.ansi_enabled,
            include_target: true,
        }
    }
}

/// Metrics section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Exporter listen address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_metrics_addr(),
        }
    }
}

impl MetricsSection {
    /// Converts to the telemetry crate's configuration.
    #[must_use]
    pub fn to_metrics_config(&self) -> MetricsConfig {
        MetricsConfig {
            enabled: self.enabled,
            addr: self.addr.clone(),
        }
    }
}

const fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}
