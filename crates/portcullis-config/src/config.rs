//! The root configuration type.

use std::collections::HashSet;

use portcullis_middleware::PipelineConfig;
use serde::{Deserialize, Serialize};

use crate::{CacheSection, ConfigError, LogFormat, LoggingSection, MetricsSection, StoreConfig, StoreKind};

/// Complete Portcullis configuration.
///
/// Loaded once at startup by [`ConfigLoader`](crate::ConfigLoader) and then
/// shared read-only; the pipeline and the rebuild engine take what they
/// need from it when they are built.
///
/// # Example
///
/// ```
/// use portcullis_config::PortcullisConfig;
///
/// let config = PortcullisConfig::default();
/// assert_eq!(config.pipeline.headers.app_id, "x-app-id");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortcullisConfig {
    /// Header names, signing rules and stage settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Cache registry and secret caching.
    #[serde(default)]
    pub cache: CacheSection,

    /// Cache store backend.
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingSection,

    /// Metrics.
    #[serde(default)]
    pub metrics: MetricsSection,
}

impl PortcullisConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for the first problem found:
    /// - an empty or duplicated header name
    /// - an empty cache delimiter
    /// - a registry entry that the rebuild engine would skip
    /// - a Redis store without a URL
    /// - an unparsable metrics address while metrics are enabled
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (field, name) in self.pipeline.headers.entries() {
            let path = format!("pipeline.headers.{field}");
            if name.trim().is_empty() {
                return Err(ConfigError::invalid_value(path, "header name is empty"));
            }
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(ConfigError::invalid_value(
                    path,
                    format!("header name {name} is used twice"),
                ));
            }
        }

        if self.pipeline.signature.credential_field.is_empty() {
            return Err(ConfigError::invalid_value(
                "pipeline.signature.credential_field",
                "must not be empty",
            ));
        }

        let registry = &self.cache.registry;
        if registry.delimiter.is_empty() {
            return Err(ConfigError::invalid_value(
                "cache.registry.delimiter",
                "must not be empty",
            ));
        }
        if let Some((index, reason)) = registry.problems().into_iter().next() {
            return Err(ConfigError::invalid_value(
                format!("cache.registry.entries.{index}"),
                reason,
            ));
        }

        if self.store.kind == StoreKind::Redis
            && self.store.url.as_deref().map_or(true, |url| url.trim().is_empty())
        {
            return Err(ConfigError::invalid_value(
                "store.url",
                "required for the redis store",
            ));
        }

        if self.metrics.enabled && self.metrics.addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "metrics.addr",
                format!("invalid socket address: {}", self.metrics.addr),
            ));
        }

        Ok(())
    }

    /// Development preset: pretty debug logs, in-memory store.
    ///
    /// # Example
    ///
    /// ```
    /// use portcullis_config::PortcullisConfig;
    ///
    /// let config = PortcullisConfig::development();
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Pretty;
        config.logging.ansi_enabled = true;
        config.logging.include_location = true;
        config
    }

    /// Production preset: JSON info logs and the metrics exporter.
    ///
    /// # Example
    ///
    /// ```
    /// use portcullis_config::{LogFormat, PortcullisConfig};
    ///
    /// let config = PortcullisConfig::production();
    /// assert_eq!(config.logging.format, LogFormat::Json);
    /// assert!(config.metrics.enabled);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.logging.level = "info".to_string();
        config.logging.format = LogFormat::Json;
        config.logging.ansi_enabled = false;
        config.metrics.enabled = true;
        config
    }
}
