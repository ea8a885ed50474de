//! # Portcullis
//!
//! **Request-boundary security pipeline and cache rebuild engine**
//!
//! - Payload encryption: AES-CBC or chunked RSA, whole payload or per field
//! - Signatures: MD5/SHA digests, AES MAC or SHA256withRSA over canonical
//!   `key=value&...` strings
//! - Per-application key material, resolved cache-first
//! - Declarative rebuild of string/hash/list/set/sorted-set cache keys from
//!   registered data sources
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use portcullis::prelude::*;
//!
//! let config = ConfigLoader::new()
//!     .with_optional_file("portcullis.toml")?
//!     .with_env_prefix("PORTCULLIS")
//!     .load()?;
//! portcullis::init_telemetry(&config)?;
//!
//! let store = portcullis::connect_store(&config.store).await?;
//! let gateway = Gateway::from_config(&config, store, secrets, sources);
//!
//! let response = gateway
//!     .handle(MiddlewareContext::for_operation("user.login"), request, handler)
//!     .await;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Request → ErrorNorm → RequestId → Parameters → Crypto → Signature → Handler
//!                                                                        ↓
//! Response ← ErrorNorm ← RequestId ← Parameters ← Crypto ← Signature ←──┘
//! ```

#![doc(html_root_url = "https://docs.rs/portcullis/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod gateway;

pub use gateway::{connect_store, init_telemetry, Gateway};

// Re-export core types
pub use portcullis_core as core;

// Re-export crypto building blocks
pub use portcullis_crypto as crypto;

// Re-export the cache engine
pub use portcullis_cache as cache;

// Re-export the pipeline
pub use portcullis_middleware as middleware;

// Re-export configuration
pub use portcullis_config as config;
pub use portcullis_config::{ConfigLoader, PortcullisConfig};

// Re-export telemetry
pub use portcullis_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```
/// use portcullis::prelude::*;
///
/// let config = PortcullisConfig::default();
/// assert!(config.validate().is_ok());
/// ```
pub mod prelude {
    pub use crate::gateway::Gateway;
    pub use portcullis_cache::{CacheSource, CacheStore, FnSource, MemoryStore, SourceRegistry};
    pub use portcullis_config::{ConfigLoader, PortcullisConfig};
    pub use portcullis_core::{ApiResponse, PortcullisError, RequestId};
    pub use portcullis_crypto::{SecretMaterial, SecretSource, StaticSecretSource};
    pub use portcullis_middleware::{MiddlewareContext, Request, Response, ResponseExt};
}
