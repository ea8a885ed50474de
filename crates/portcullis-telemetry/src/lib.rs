//! Observability for Portcullis.
//!
//! - **Logging**: structured JSON (or pretty) logs through `tracing-subscriber`
//! - **Metrics**: Prometheus counters through the `metrics` crate
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `portcullis_crypto_failures_total` | Counter | `direction`, `algorithm` | Failed decrypt/encrypt operations |
//! | `portcullis_signature_checks_total` | Counter | `result` | Inbound signature verifications |
//! | `portcullis_cache_rebuilds_total` | Counter | `index`, `outcome` | Cache rebuild outcomes per registry index |
//! | `portcullis_cache_keys_written_total` | Counter | `index` | Cache keys written by rebuilds |
//!
//! Recording functions are no-ops until [`init_metrics`] installs a recorder.
//!
//! # Example
//!
//! ```rust,ignore
//! use portcullis_telemetry::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::production())?;
//! tracing::info!(app_id = "X1", "pipeline ready");
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, redact, LogConfig};
pub use metrics::{init_metrics, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
