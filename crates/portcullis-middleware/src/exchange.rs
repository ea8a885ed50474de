//! State shared by the crypto and signature stages of one exchange.

use crate::context::MiddlewareContext;
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use portcullis_core::{ErrorCategory, PortcullisError};
use portcullis_crypto::{decode_app_id, KeyKind, SecretError, SecretMaterial, SecretResolver};
use std::sync::Arc;
use tracing::{error, warn};

/// Returns the caller's application id, decoding the header on first use.
pub(crate) fn app_id(
    ctx: &mut MiddlewareContext,
    headers: &HeaderMap,
    header: &str,
) -> Result<String, PortcullisError> {
    if let Some(app_id) = ctx.app_id() {
        return Ok(app_id.to_string());
    }

    let raw = headers
        .get(header)
        .ok_or_else(|| PortcullisError::validation_field("missing application id", header))?
        .to_str()
        .map_err(|_| PortcullisError::validation_field("invalid application id", header))?;
    let app_id = decode_app_id(raw).map_err(secret_error)?;
    ctx.set_app_id(app_id.clone());
    Ok(app_id)
}

/// Returns key material carrying `kinds`, reusing what an earlier stage
/// resolved for this exchange.
pub(crate) async fn secret(
    ctx: &mut MiddlewareContext,
    resolver: &SecretResolver,
    headers: &HeaderMap,
    header: &str,
    kinds: &[KeyKind],
) -> Result<Arc<SecretMaterial>, PortcullisError> {
    if let Some(material) = ctx.secret() {
        if kinds.iter().all(|kind| material.has(*kind)) {
            return Ok(Arc::clone(material));
        }
    }

    let app_id = app_id(ctx, headers, header)?;
    let material = Arc::new(resolver.resolve(&app_id, kinds).await.map_err(secret_error)?);
    ctx.set_secret(Arc::clone(&material));
    Ok(material)
}

/// Maps a resolution failure onto the boundary taxonomy.
pub(crate) fn secret_error(err: SecretError) -> PortcullisError {
    match err {
        SecretError::InvalidAppId(_) => PortcullisError::validation(err.to_string()),
        SecretError::UnknownApp(_) | SecretError::Revoked(_) | SecretError::MissingKey { .. } => {
            warn!(error = %err, "secret material rejected");
            PortcullisError::secret(err.to_string())
        }
        SecretError::Source(_) | SecretError::Store(_) => {
            error!(error = %err, "secret resolution failed");
            PortcullisError::internal_with_source("secret resolution failed", err)
        }
    }
}

/// Folds a failure while preparing a response into an encoding error; the
/// handler has already run, so the caller is not at fault.
pub(crate) fn as_encoding(err: PortcullisError) -> PortcullisError {
    match err.category() {
        ErrorCategory::Encoding | ErrorCategory::Internal => err,
        _ => PortcullisError::encoding(err.to_string()),
    }
}

/// Sets a response header, logging instead of failing on a bad name.
pub(crate) fn echo(headers: &mut HeaderMap, name: &str, token: &'static str) {
    match HeaderName::from_bytes(name.as_bytes()) {
        Ok(name) => {
            headers.insert(name, HeaderValue::from_static(token));
        }
        Err(_) => warn!(header = name, "skipping echo of invalid header name"),
    }
}
