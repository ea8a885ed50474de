//! Layered configuration loader.
//!
//! Defaults, then a TOML or JSON file, then environment variables.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::{ConfigError, PortcullisConfig};

/// Configuration loader with layered approach.
///
/// Later layers override earlier ones:
/// 1. Default values (or a preset)
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables, `PREFIX__SECTION__KEY`
///
/// # Example
///
/// ```no_run
/// use portcullis_config::ConfigLoader;
///
/// # fn main() -> Result<(), portcullis_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("portcullis.toml")?
///     .with_env_prefix("PORTCULLIS")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: PortcullisConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader starting from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: PortcullisConfig::default(),
            env_prefix: None,
        }
    }

    /// Resets to the default configuration.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = PortcullisConfig::default();
        self
    }

    /// Starts from the development preset.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = PortcullisConfig::development();
        self
    }

    /// Starts from the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = PortcullisConfig::production();
        self
    }

    /// Loads a `.toml` or `.json` file, replacing the current configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing or unreadable, has an
    /// unsupported extension, or does not parse (unknown fields included).
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        self.config = Self::parse(&content, &format, &path.display().to_string())?;
        Ok(self)
    }

    /// Like [`with_file`](Self::with_file), but a missing file is skipped.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Loads configuration text in `format` (`"toml"` or `"json"`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the format is unknown or parsing fails.
    ///
    /// # Example
    ///
    /// ```
    /// use portcullis_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [pipeline.rules."user.login"]
    ///     request = ["name", "password", "secureCode"]
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert!(config.pipeline.rules.get("user.login").is_some());
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = Self::parse(content, &format.to_lowercase(), "string")?;
        Ok(self)
    }

    /// Sets the environment variable prefix.
    ///
    /// With prefix `PORTCULLIS`:
    /// - `PORTCULLIS__STORE__URL=redis://cache:6379/0`
    /// - `PORTCULLIS__PIPELINE__SIGNATURE__DEFAULT_ALGORITHM=sha256`
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Loads variables from a `.env` file in the working directory, if any.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Dotenv` if the file exists but is malformed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(err) if err.not_found() => Ok(self),
            Err(err) => Err(err.into()),
        }
    }

    /// Applies environment overrides and validates.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override does not parse or validation
    /// fails.
    pub fn load(mut self) -> Result<PortcullisConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }
        self.config.validate()?;
        Ok(self.config)
    }

    /// Returns the configuration without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> PortcullisConfig {
        self.config
    }

    fn parse(content: &str, format: &str, origin: &str) -> Result<PortcullisConfig, ConfigError> {
        match format {
            "toml" => Ok(toml::from_str(content)?),
            "json" => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::unsupported_format(format, origin)),
        }
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let marker = format!("{prefix}__");
        let env_vars: HashMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(&marker))
            .collect();

        for (key, value) in env_vars {
            self.apply_env_var(&key, &value, prefix)?;
        }
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let key_without_prefix = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;
        let parts: Vec<&str> = key_without_prefix.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            // Pipeline headers
            ["PIPELINE", "HEADERS", "APP_ID"] => config.pipeline.headers.app_id = value.to_string(),
            ["PIPELINE", "HEADERS", "CRYPTO"] => config.pipeline.headers.crypto = value.to_string(),
            ["PIPELINE", "HEADERS", "SIGNATURE"] => {
                config.pipeline.headers.signature = value.to_string();
            }
            ["PIPELINE", "HEADERS", "CIPHER"] => config.pipeline.headers.cipher = value.to_string(),
            ["PIPELINE", "HEADERS", "REQUEST_ID"] => {
                config.pipeline.headers.request_id = value.to_string();
            }

            // Crypto stage
            ["PIPELINE", "CRYPTO", "ENABLED"] => {
                config.pipeline.crypto.enabled = parse_bool(key, value)?;
            }
            ["PIPELINE", "CRYPTO", "DEFAULT_ALGORITHM"] => {
                config.pipeline.crypto.default_algorithm =
                    parse_enum(key, value, "expected 'aes' or 'rsa'")?;
            }
            ["PIPELINE", "CRYPTO", "RSA_PADDING"] => {
                config.pipeline.crypto.rsa_padding =
                    parse_enum(key, value, "expected 'pkcs1v15' or 'oaep_sha1'")?;
            }

            // Signature stage
            ["PIPELINE", "SIGNATURE", "ENABLED"] => {
                config.pipeline.signature.enabled = parse_bool(key, value)?;
            }
            ["PIPELINE", "SIGNATURE", "DEFAULT_ALGORITHM"] => {
                config.pipeline.signature.default_algorithm =
                    parse_enum(key, value, "expected 'md5', 'sha1', 'sha256', 'aes' or 'rsa'")?;
            }
            ["PIPELINE", "SIGNATURE", "MAC_DIGEST"] => {
                config.pipeline.signature.mac_digest =
                    parse_enum(key, value, "expected 'md5', 'sha1' or 'sha256'")?;
            }
            ["PIPELINE", "SIGNATURE", "CREDENTIAL_FIELD"] => {
                config.pipeline.signature.credential_field = value.to_string();
            }

            // Cache
            ["CACHE", "REGISTRY", "DELIMITER"] => config.cache.registry.delimiter = value.to_string(),
            ["CACHE", "REGISTRY", "JITTER_SECS"] => {
                config.cache.registry.jitter_secs = parse_int(key, value)?;
            }
            ["CACHE", "SECRETS", "KEY_PREFIX"] => config.cache.secrets.key_prefix = value.to_string(),
            ["CACHE", "SECRETS", "TTL_SECS"] => config.cache.secrets.ttl_secs = parse_int(key, value)?,

            // Store
            ["STORE", "KIND"] => {
                config.store.kind = parse_enum(key, value, "expected 'memory' or 'redis'")?;
            }
            ["STORE", "URL"] => {
                config.store.url = (!value.is_empty()).then(|| value.to_string());
            }

            // Logging
            ["LOGGING", "ENABLED"] => config.logging.enabled = parse_bool(key, value)?,
            ["LOGGING", "LEVEL"] => config.logging.level = value.to_string(),
            ["LOGGING", "FORMAT"] => {
                config.logging.format = parse_enum(key, value, "expected 'json' or 'pretty'")?;
            }
            ["LOGGING", "ANSI_ENABLED"] => config.logging.ansi_enabled = parse_bool(key, value)?,
            ["LOGGING", "INCLUDE_LOCATION"] => {
                config.logging.include_location = parse_bool(key, value)?;
            }

            // Metrics
            ["METRICS", "ENABLED"] => config.metrics.enabled = parse_bool(key, value)?,
            ["METRICS", "ADDR"] => config.metrics.addr = value.to_string(),

            // Signing rules and registry entries only come from files.
            _ => {}
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::env_parse_error(key, "expected boolean")),
    }
}

fn parse_int(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

/// Parses a value through the type's own serde names.
fn parse_enum<T: DeserializeOwned>(key: &str, value: &str, expected: &str) -> Result<T, ConfigError> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_lowercase()))
        .map_err(|_| ConfigError::env_parse_error(key, expected))
}
