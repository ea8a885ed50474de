//! Payload crypto middleware.
//!
//! Runs when the stage is enabled, the operation has a signing rule and the
//! request carries the cipher header. The crypto header picks AES or RSA
//! (default from configuration).
//!
//! Inbound, before the rest of the chain:
//!
//! - combined mode (`cipher`): the `ciphertext` parameter, or the raw body
//!   when there is none, is decrypted, parsed as a JSON object and merged
//!   into the parameters
//! - split mode: each listed parameter is decrypted in place, `json:` fields
//!   are parsed after decryption
//!
//! Outbound, on success envelopes only: combined mode replaces `data` with
//! `{"ciphertext": ...}`, split mode encrypts the listed `data` fields.
//!
//! Decryption uses the shared AES key or the server's private key;
//! encryption uses the shared AES key or the user's public key.

use crate::cipher_header::{CipherSelection, FieldSelector, CIPHERTEXT_FIELD};
use crate::config::{CryptoStageConfig, HeaderNames, SigningRules};
use crate::context::MiddlewareContext;
use crate::exchange::{self, echo};
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{seal, Outbound, Request, Response, ResponseExt};
use bytes::Bytes;
use http::HeaderMap;
use portcullis_core::{ApiResponse, PortcullisError};
use portcullis_crypto::{render_value, Cipher, CipherAlgorithm, CryptoError, SecretResolver};
use portcullis_telemetry::logging::redact;
use portcullis_telemetry::metrics::{record_crypto_failure, Direction};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Middleware that decrypts requests and encrypts responses.
pub struct CryptoMiddleware {
    config: CryptoStageConfig,
    headers: Arc<HeaderNames>,
    rules: Arc<SigningRules>,
    resolver: Arc<SecretResolver>,
}

impl std::fmt::Debug for CryptoMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoMiddleware")
            .field("config", &self.config)
            .field("rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}

impl CryptoMiddleware {
    /// Creates the middleware.
    #[must_use]
    pub fn new(
        config: CryptoStageConfig,
        headers: Arc<HeaderNames>,
        rules: Arc<SigningRules>,
        resolver: Arc<SecretResolver>,
    ) -> Self {
        Self {
            config,
            headers,
            rules,
            resolver,
        }
    }

    fn algorithm(&self, headers: &HeaderMap) -> Result<CipherAlgorithm, PortcullisError> {
        match headers.get(self.headers.crypto.as_str()) {
            None => Ok(self.config.default_algorithm),
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|token| token.parse().ok())
                .ok_or_else(|| {
                    PortcullisError::validation_field(
                        "unsupported crypto algorithm",
                        self.headers.crypto.as_str(),
                    )
                }),
        }
    }

    async fn inbound(
        &self,
        ctx: &mut MiddlewareContext,
        headers: &HeaderMap,
        algorithm: CipherAlgorithm,
        selection: &CipherSelection,
    ) -> Result<(), PortcullisError> {
        let material = exchange::secret(
            ctx,
            &self.resolver,
            headers,
            &self.headers.app_id,
            algorithm.decryption_keys(),
        )
        .await?;
        let cipher = Cipher::inbound(algorithm, &material, self.config.rsa_padding)
            .map_err(|err| PortcullisError::internal_with_source("key material unusable", err))?;

        let params = match selection {
            CipherSelection::Combined => {
                decrypt_combined(&cipher, ctx.params(), ctx.raw_body())?
            }
            CipherSelection::Fields(fields) => decrypt_fields(&cipher, fields, ctx.params())?,
        };
        ctx.set_params(params);
        Ok(())
    }

    async fn outbound(
        &self,
        ctx: &mut MiddlewareContext,
        headers: &HeaderMap,
        algorithm: CipherAlgorithm,
        selection: &CipherSelection,
        response: Response,
    ) -> Response {
        let (parts, mut envelope) = match Outbound::open(response).await {
            Outbound::Envelope(parts, envelope) => (parts, envelope),
            Outbound::Untouched(response) => return response,
        };

        let sealed = self
            .encrypt_envelope(ctx, headers, algorithm, selection, &mut envelope)
            .await;

        match sealed {
            Ok(()) => seal(parts, &envelope),
            Err(err) => {
                let err = exchange::as_encoding(err);
                error!(
                    request_id = %ctx.request_id(),
                    operation_id = ?ctx.operation_id(),
                    algorithm = algorithm.as_str(),
                    error = %err,
                    "response encryption failed"
                );
                Response::failure(&err)
            }
        }
    }

    async fn encrypt_envelope(
        &self,
        ctx: &mut MiddlewareContext,
        headers: &HeaderMap,
        algorithm: CipherAlgorithm,
        selection: &CipherSelection,
        envelope: &mut ApiResponse,
    ) -> Result<(), PortcullisError> {
        let Some(data) = envelope.data_object_mut() else {
            return Ok(());
        };
        let material = exchange::secret(
            ctx,
            &self.resolver,
            headers,
            &self.headers.app_id,
            algorithm.encryption_keys(),
        )
        .await?;
        let cipher = Cipher::outbound(algorithm, &material, self.config.rsa_padding)
            .map_err(|err| PortcullisError::encoding(err.to_string()))?;
        match selection {
            CipherSelection::Combined => encrypt_combined(&cipher, data),
            CipherSelection::Fields(fields) => encrypt_fields(&cipher, fields, data),
        }
    }

    fn reject(&self, ctx: &MiddlewareContext, err: &PortcullisError) -> Response {
        warn!(
            request_id = %ctx.request_id(),
            operation_id = ?ctx.operation_id(),
            field = ?err.field(),
            error = %err,
            "request decryption rejected"
        );
        Response::failure(err)
    }
}

fn inbound_failure(
    algorithm: CipherAlgorithm,
    field: Option<&str>,
    input: &str,
    err: &CryptoError,
) -> PortcullisError {
    warn!(
        algorithm = algorithm.as_str(),
        field = field.unwrap_or(CIPHERTEXT_FIELD),
        input = %redact(input),
        error = %err,
        "decryption failed"
    );
    record_crypto_failure(Direction::Inbound, algorithm.as_str());
    match field {
        Some(field) => PortcullisError::crypto(format!("cannot decrypt {field}"), Some(field.to_string())),
        None => PortcullisError::crypto("cannot decrypt payload", None),
    }
}

fn outbound_failure(algorithm: CipherAlgorithm, err: &CryptoError) -> PortcullisError {
    record_crypto_failure(Direction::Outbound, algorithm.as_str());
    PortcullisError::encoding(err.to_string())
}

/// Decrypts the single combined payload and merges it into the parameters.
fn decrypt_combined(
    cipher: &Cipher,
    params: &Map<String, Value>,
    raw_body: &Bytes,
) -> Result<Map<String, Value>, PortcullisError> {
    let payload = match params.get(CIPHERTEXT_FIELD) {
        Some(value) => value.as_str().unwrap_or_default().trim(),
        None => std::str::from_utf8(raw_body).unwrap_or_default().trim(),
    };
    if payload.is_empty() {
        return Err(PortcullisError::missing_parameter(CIPHERTEXT_FIELD));
    }

    let plaintext = cipher
        .decrypt(payload)
        .map_err(|err| inbound_failure(cipher.algorithm(), None, payload, &err))?;
    let Ok(Value::Object(decrypted)) = serde_json::from_slice::<Value>(&plaintext) else {
        return Err(PortcullisError::decode(
            "decrypted payload is not a JSON object",
            None,
        ));
    };

    let mut merged = params.clone();
    merged.remove(CIPHERTEXT_FIELD);
    merged.extend(decrypted);
    Ok(merged)
}

/// Decrypts each selected parameter in place.
fn decrypt_fields(
    cipher: &Cipher,
    fields: &[FieldSelector],
    params: &Map<String, Value>,
) -> Result<Map<String, Value>, PortcullisError> {
    let mut decrypted = params.clone();
    for selector in fields {
        let name = selector.name.as_str();
        let ciphertext = match params.get(name) {
            None | Some(Value::Null) => continue,
            Some(Value::String(text)) if text.is_empty() => continue,
            Some(Value::String(text)) => text.as_str(),
            Some(_) => {
                return Err(PortcullisError::crypto(
                    format!("{name} is not ciphertext"),
                    Some(name.to_string()),
                ))
            }
        };

        let plaintext = cipher
            .decrypt(ciphertext)
            .map_err(|err| inbound_failure(cipher.algorithm(), Some(name), ciphertext, &err))?;
        let plaintext = String::from_utf8(plaintext).map_err(|_| {
            PortcullisError::decode(format!("{name} is not UTF-8"), Some(name.to_string()))
        })?;
        let value = if selector.json {
            serde_json::from_str(&plaintext).map_err(|_| {
                PortcullisError::decode(format!("{name} is not valid JSON"), Some(name.to_string()))
            })?
        } else {
            Value::String(plaintext)
        };
        decrypted.insert(name.to_string(), value);
    }
    Ok(decrypted)
}

/// Replaces `data` with its encrypted serialization.
fn encrypt_combined(cipher: &Cipher, data: &mut Map<String, Value>) -> Result<(), PortcullisError> {
    let plaintext =
        serde_json::to_vec(&*data).map_err(|err| PortcullisError::encoding(err.to_string()))?;
    let sealed = cipher
        .encrypt(&plaintext)
        .map_err(|err| outbound_failure(cipher.algorithm(), &err))?;
    data.clear();
    data.insert(CIPHERTEXT_FIELD.to_string(), Value::String(sealed));
    Ok(())
}

/// Encrypts each selected `data` field in place.
fn encrypt_fields(
    cipher: &Cipher,
    fields: &[FieldSelector],
    data: &mut Map<String, Value>,
) -> Result<(), PortcullisError> {
    for selector in fields {
        let plaintext = match data.get(&selector.name) {
            None | Some(Value::Null) => continue,
            Some(Value::String(text)) if text.is_empty() => continue,
            Some(value) if selector.json => serde_json::to_string(value)
                .map_err(|err| PortcullisError::encoding(err.to_string()))?,
            Some(value) => render_value(value),
        };
        let sealed = cipher
            .encrypt(plaintext.as_bytes())
            .map_err(|err| outbound_failure(cipher.algorithm(), &err))?;
        data.insert(selector.name.clone(), Value::String(sealed));
    }
    Ok(())
}

impl Middleware for CryptoMiddleware {
    fn name(&self) -> &'static str {
        "crypto"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            // A rule for the operation is the gate, even one whose request
            // list is empty: such routes still take encrypted input.
            if !self.config.enabled
                || ctx
                    .operation_id()
                    .and_then(|operation| self.rules.get(operation))
                    .is_none()
            {
                return next.run(ctx, request).await;
            }
            let Some(header) = request.headers().get(self.headers.cipher.as_str()) else {
                return next.run(ctx, request).await;
            };

            let selection = match header
                .to_str()
                .map_err(|_| PortcullisError::validation("malformed cipher header"))
                .and_then(CipherSelection::parse)
            {
                Ok(selection) => selection,
                Err(err) => return self.reject(ctx, &err),
            };
            let headers = request.headers().clone();
            let algorithm = match self.algorithm(&headers) {
                Ok(algorithm) => algorithm,
                Err(err) => return self.reject(ctx, &err),
            };

            if let Err(err) = self.inbound(ctx, &headers, algorithm, &selection).await {
                let mut response = self.reject(ctx, &err);
                echo(response.headers_mut(), &self.headers.crypto, algorithm.as_str());
                return response;
            }
            debug!(
                request_id = %ctx.request_id(),
                algorithm = algorithm.as_str(),
                "request decrypted"
            );

            let response = next.run(ctx, request).await;
            let mut response = self
                .outbound(ctx, &headers, algorithm, &selection, response)
                .await;
            echo(response.headers_mut(), &self.headers.crypto, algorithm.as_str());
            response
        })
    }
}
