//! Typed configuration for Portcullis.
//!
//! - TOML and JSON files
//! - Environment variable overrides (`PREFIX__SECTION__KEY`)
//! - Strict parsing: unknown fields are errors
//! - Layered loading: defaults → file → env
//!
//! [`PortcullisConfig`] has five sections:
//!
//! - `pipeline` - header names, signing rules, crypto and signature stages
//! - `cache` - the rebuild registry and secret caching
//! - `store` - memory or Redis
//! - `logging` / `metrics` - the telemetry stack
//!
//! # Configuration File Format
//!
//! ```toml
//! [pipeline.headers]
//! app_id = "x-app-id"
//!
//! [pipeline.signature]
//! default_algorithm = "md5"
//! request = { order = "ascending", strictness = "permissive", suffix = "hashed_key" }
//!
//! [pipeline.rules."user.login"]
//! request = ["name", "password", "secureCode"]
//!
//! [cache.registry.entries.sys_config]
//! key = "sys_config:"
//! type = "hash"
//! source = "config"
//! method = "all"
//! expire = 3600
//!
//! [store]
//! kind = "redis"
//! url = "redis://127.0.0.1:6379/0"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

#![doc(html_root_url = "https://docs.rs/portcullis-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::PortcullisConfig;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{CacheSection, LogFormat, LoggingSection, MetricsSection, StoreConfig, StoreKind};
