//! Prometheus counters for the security pipeline and the cache engine.
//!
//! # Example
//!
//! ```rust,ignore
//! use portcullis_telemetry::metrics::{record_signature_check, SignatureOutcome};
//!
//! record_signature_check(SignatureOutcome::Mismatch);
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address to expose metrics on (e.g., "0.0.0.0:9090").
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Initializes the Prometheus exporter and registers metric descriptions.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparsable address and
/// `TelemetryError::MetricsInit` if the recorder cannot be installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let handle = PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(
        "portcullis_crypto_failures_total",
        "Failed decrypt/encrypt operations by direction and algorithm"
    );
    describe_counter!(
        "portcullis_signature_checks_total",
        "Inbound signature verifications by result"
    );
    describe_counter!(
        "portcullis_cache_rebuilds_total",
        "Cache rebuild outcomes per registry index"
    );
    describe_counter!(
        "portcullis_cache_keys_written_total",
        "Cache keys written by rebuilds per registry index"
    );
}

/// Direction of a crypto operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Request decryption.
    Inbound,
    /// Response encryption.
    Outbound,
}

impl Direction {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Result of an inbound signature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureOutcome {
    /// Signature verified.
    Valid,
    /// Signature present but wrong.
    Mismatch,
    /// No signature supplied.
    Missing,
}

impl SignatureOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Mismatch => "mismatch",
            Self::Missing => "missing",
        }
    }
}

/// Records a failed decrypt or encrypt.
pub fn record_crypto_failure(direction: Direction, algorithm: &str) {
    counter!(
        "portcullis_crypto_failures_total",
        "direction" => direction.as_str(),
        "algorithm" => algorithm.to_string()
    )
    .increment(1);
}

/// Records an inbound signature check.
pub fn record_signature_check(outcome: SignatureOutcome) {
    counter!(
        "portcullis_signature_checks_total",
        "result" => outcome.as_str()
    )
    .increment(1);
}

/// Records the outcome of rebuilding one registry index.
///
/// `outcome` is one of `loaded`, `skipped`, `failed`.
pub fn record_cache_rebuild(index: &str, outcome: &'static str, keys_written: u64) {
    counter!(
        "portcullis_cache_rebuilds_total",
        "index" => index.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    if keys_written > 0 {
        counter!(
            "portcullis_cache_keys_written_total",
            "index" => index.to_string()
        )
        .increment(keys_written);
    }
}
