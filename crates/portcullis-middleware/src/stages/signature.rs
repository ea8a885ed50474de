//! Signature middleware.
//!
//! Verifies the `sign` parameter of inbound requests against the canonical
//! string of the operation's request fields, and signs the `data` object of
//! successful responses over the operation's response fields. The signature
//! header picks the scheme: `md5`, `sha1`, `sha256`, `aes` (digest then
//! AES) or `rsa` (SHA256withRSA).
//!
//! Inbound runs after decryption and outbound before encryption, so
//! signatures always cover plaintext.

use crate::config::{CanonicalOptions, HeaderNames, SignatureStageConfig, SigningRules};
use crate::context::MiddlewareContext;
use crate::exchange::{self, echo};
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{seal, Outbound, Request, Response, ResponseExt};
use http::HeaderMap;
use portcullis_core::{ApiResponse, PortcullisError};
use portcullis_crypto::{
    CanonicalError, CanonicalSuffix, SecretMaterial, SecretResolver, SignatureAlgorithm,
    SignatureProvider, SuffixContext, SIGN_FIELD,
};
use portcullis_telemetry::metrics::{record_signature_check, SignatureOutcome};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Middleware that verifies and produces payload signatures.
pub struct SignatureMiddleware {
    config: SignatureStageConfig,
    headers: Arc<HeaderNames>,
    rules: Arc<SigningRules>,
    resolver: Arc<SecretResolver>,
}

impl std::fmt::Debug for SignatureMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureMiddleware")
            .field("config", &self.config)
            .field("rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}

impl SignatureMiddleware {
    /// Creates the middleware.
    #[must_use]
    pub fn new(
        config: SignatureStageConfig,
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

    fn algorithm(&self, headers: &HeaderMap) -> Result<SignatureAlgorithm, PortcullisError> {
        match headers.get(self.headers.signature.as_str()) {
            None => Ok(self.config.default_algorithm),
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|token| token.parse().ok())
                .ok_or_else(|| {
                    PortcullisError::validation_field(
                        "unsupported signature algorithm",
                        self.headers.signature.as_str(),
                    )
                }),
        }
    }

    async fn material(
        &self,
        ctx: &mut MiddlewareContext,
        headers: &HeaderMap,
        algorithm: SignatureAlgorithm,
        inbound: bool,
    ) -> Result<Option<Arc<SecretMaterial>>, PortcullisError> {
        if !algorithm.needs_secret() {
            return Ok(None);
        }
        let kinds = if inbound {
            algorithm.verification_keys()
        } else {
            algorithm.signing_keys()
        };
        exchange::secret(ctx, &self.resolver, headers, &self.headers.app_id, kinds)
            .await
            .map(Some)
    }

    /// The app id for a suffix that embeds it; empty when none is needed.
    fn suffix_app_id(
        &self,
        ctx: &mut MiddlewareContext,
        headers: &HeaderMap,
        options: &CanonicalOptions,
    ) -> Result<String, PortcullisError> {
        if options.suffix == CanonicalSuffix::None {
            return Ok(String::new());
        }
        exchange::app_id(ctx, headers, &self.headers.app_id)
    }

    fn canonical(
        &self,
        options: &CanonicalOptions,
        params: &Map<String, Value>,
        fields: &[String],
        suffix: &SuffixContext<'_>,
    ) -> Result<String, PortcullisError> {
        options
            .builder(&self.config.credential_field)
            .build(params, fields, suffix)
            .map_err(|CanonicalError::MissingParameter(field)| {
                PortcullisError::missing_parameter(field)
            })
    }

    async fn verify(
        &self,
        ctx: &mut MiddlewareContext,
        headers: &HeaderMap,
        algorithm: SignatureAlgorithm,
        fields: &[String],
    ) -> Result<(), PortcullisError> {
        let Some(received) = ctx
            .param_str(SIGN_FIELD)
            .filter(|sign| !sign.is_empty())
            .map(str::to_string)
        else {
            record_signature_check(SignatureOutcome::Missing);
            return Err(PortcullisError::missing_parameter(SIGN_FIELD));
        };

        let material = self.material(ctx, headers, algorithm, true).await?;
        let provider =
            SignatureProvider::for_verification(algorithm, material.as_deref(), self.config.mac_digest)
                .map_err(|err| PortcullisError::internal_with_source("key material unusable", err))?;

        let options = self.config.request;
        let app_id = self.suffix_app_id(ctx, headers, &options)?;
        let suffix = SuffixContext {
            app_id: &app_id,
            request_id: ctx.request_id().as_str(),
        };
        let canonical = self.canonical(&options, ctx.params(), fields, &suffix)?;

        if provider.verify(canonical.as_bytes(), &received) {
            record_signature_check(SignatureOutcome::Valid);
            debug!(
                request_id = %ctx.request_id(),
                algorithm = algorithm.as_str(),
                "signature verified"
            );
            return Ok(());
        }

        record_signature_check(SignatureOutcome::Mismatch);
        debug!(request_id = %ctx.request_id(), canonical = %canonical, "rejected canonical string");
        warn!(
            request_id = %ctx.request_id(),
            operation_id = ?ctx.operation_id(),
            algorithm = algorithm.as_str(),
            received = %received,
            "signature mismatch"
        );
        Err(PortcullisError::signature_mismatch("signature mismatch"))
    }

    async fn sign_envelope(
        &self,
        ctx: &mut MiddlewareContext,
        headers: &HeaderMap,
        algorithm: SignatureAlgorithm,
        fields: &[String],
        envelope: &mut ApiResponse,
    ) -> Result<(), PortcullisError> {
        let material = self.material(ctx, headers, algorithm, false).await?;
        let provider =
            SignatureProvider::for_signing(algorithm, material.as_deref(), self.config.mac_digest)
                .map_err(|err| PortcullisError::encoding(err.to_string()))?;

        let options = self.config.response;
        let app_id = self.suffix_app_id(ctx, headers, &options)?;
        let Some(data) = envelope.data_object_mut() else {
            return Ok(());
        };
        let suffix = SuffixContext {
            app_id: &app_id,
            request_id: ctx.request_id().as_str(),
        };
        let canonical = self.canonical(&options, data, fields, &suffix)?;
        let sign = provider
            .sign(canonical.as_bytes())
            .map_err(|err| PortcullisError::encoding(err.to_string()))?;
        data.insert(SIGN_FIELD.to_string(), Value::String(sign));
        Ok(())
    }

    async fn sign_response(
        &self,
        ctx: &mut MiddlewareContext,
        headers: &HeaderMap,
        algorithm: SignatureAlgorithm,
        fields: &[String],
        response: Response,
    ) -> Response {
        let (parts, mut envelope) = match Outbound::open(response).await {
            Outbound::Envelope(parts, envelope) => (parts, envelope),
            Outbound::Untouched(response) => return response,
        };

        match self
            .sign_envelope(ctx, headers, algorithm, fields, &mut envelope)
            .await
        {
            Ok(()) => seal(parts, &envelope),
            Err(err) => {
                let err = exchange::as_encoding(err);
                error!(
                    request_id = %ctx.request_id(),
                    operation_id = ?ctx.operation_id(),
                    algorithm = algorithm.as_str(),
                    error = %err,
                    "response signing failed"
                );
                Response::failure(&err)
            }
        }
    }

    fn reject(&self, ctx: &MiddlewareContext, err: &PortcullisError) -> Response {
        warn!(
            request_id = %ctx.request_id(),
            operation_id = ?ctx.operation_id(),
            field = ?err.field(),
            error = %err,
            "signature check rejected request"
        );
        Response::failure(err)
    }
}

impl Middleware for SignatureMiddleware {
    fn name(&self) -> &'static str {
        "signature"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let rule = if self.config.enabled {
                ctx.operation_id()
                    .and_then(|operation| self.rules.get(operation))
                    .filter(|rule| !rule.request.is_empty() || !rule.response.is_empty())
            } else {
                None
            };
            let Some(rule) = rule else {
                return next.run(ctx, request).await;
            };

            let headers = request.headers().clone();
            let algorithm = match self.algorithm(&headers) {
                Ok(algorithm) => algorithm,
                Err(err) => return self.reject(ctx, &err),
            };

            if !rule.request.is_empty() {
                if let Err(err) = self.verify(ctx, &headers, algorithm, &rule.request).await {
                    let mut response = self.reject(ctx, &err);
                    echo(response.headers_mut(), &self.headers.signature, algorithm.as_str());
                    return response;
                }
            }

            let response = next.run(ctx, request).await;
            let mut response = if rule.response.is_empty() {
                response
            } else {
                self.sign_response(ctx, &headers, algorithm, &rule.response, response)
                    .await
            };
            echo(response.headers_mut(), &self.headers.signature, algorithm.as_str());
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SigningRule;
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;
    use portcullis_cache::MemoryStore;
    use portcullis_crypto::{
        DigestAlgorithm, SecretConfig, StaticSecretSource, DEFAULT_CREDENTIAL_FIELD,
    };
    use serde_json::json;

    fn middleware(config: SignatureStageConfig) -> SignatureMiddleware {
        let rules = SigningRules::new()
            .with_rule(
                "user.login",
                SigningRule::new(["name", "password"], ["token"]),
            )
            .with_rule("user.logout", SigningRule::new(["name"], std::iter::empty::<&str>()));
        let source = StaticSecretSource::new().with_material(
            SecretMaterial::new("X1").with_aes("0123456789abcdef", "fedcba9876543210"),
        );
        let resolver = SecretResolver::new(
            Arc::new(MemoryStore::new()),
            Arc::new(source),
            SecretConfig::default(),
        );
        SignatureMiddleware::new(
            config,
            Arc::new(HeaderNames::default()),
            Arc::new(rules),
            Arc::new(resolver),
        )
    }

    fn request(sign_type: Option<&str>) -> Request {
        let mut builder = http::Request::builder()
            .uri("/login")
            .header("x-app-id", "WDE=");
        if let Some(sign_type) = sign_type {
            builder = builder.header("x-sign-type", sign_type);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    fn context(operation: &str, params: Value) -> MiddlewareContext {
        let mut ctx = MiddlewareContext::for_operation(operation);
        ctx.set_params(params.as_object().cloned().unwrap());
        ctx
    }

    fn md5_sign(params: &Value, fields: &[&str]) -> String {
        let fields: Vec<String> = fields.iter().map(ToString::to_string).collect();
        let canonical = CanonicalOptions::request()
            .builder(DEFAULT_CREDENTIAL_FIELD)
            .build(params.as_object().unwrap(), &fields, &SuffixContext::default())
            .unwrap();
        SignatureProvider::digest(DigestAlgorithm::Md5)
            .sign(canonical.as_bytes())
            .unwrap()
    }

    fn handler<'a>() -> Next<'a> {
        Next::handler(|_ctx, _req| {
            Box::pin(async { Response::ok(json!({"token": "t-1", "name": "bob"})) })
        })
    }

    async fn body(response: Response) -> ApiResponse {
        let bytes = crate::types::collect_body(response.into_body()).await;
        ApiResponse::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_valid_md5_signature_passes_and_response_is_signed() {
        let params = json!({"name": "bob", "password": "pw", "key": "ignored"});
        let sign = md5_sign(&params, &["name", "password"]);
        let mut params = params;
        params["sign"] = json!(sign);

        let stage = middleware(SignatureStageConfig::default());
        let mut ctx = context("user.login", params);
        let response = stage.process(&mut ctx, request(None), handler()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-sign-type"], "md5");
        let envelope = body(response).await;
        let data = envelope.data_object().unwrap();
        let expected = md5_sign(&json!({"token": "t-1"}), &["token"]);
        assert_eq!(data["sign"], json!(expected));
    }

    #[tokio::test]
    async fn test_tampered_signature_rejected() {
        let params = json!({"name": "bob", "password": "pw"});
        let mut sign = md5_sign(&params, &["name", "password"]);
        let last = if sign.ends_with('0') { "1" } else { "0" };
        sign.replace_range(sign.len() - 1.., last);
        let mut params = params;
        params["sign"] = json!(sign);

        let stage = middleware(SignatureStageConfig::default());
        let mut ctx = context("user.login", params);
        let response = stage.process(&mut ctx, request(None), handler()).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body(response).await.code, 4010);
    }

    #[tokio::test]
    async fn test_missing_signature_and_parameter() {
        let stage = middleware(SignatureStageConfig::default());

        let mut ctx = context("user.login", json!({"name": "bob", "password": "pw"}));
        let response = stage.process(&mut ctx, request(None), handler()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body(response).await.message, "missing parameter: sign");

        let mut ctx = context("user.login", json!({"name": "bob", "sign": "abc"}));
        let response = stage.process(&mut ctx, request(None), handler()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body(response).await.message, "missing parameter: password");
    }

    #[tokio::test]
    async fn test_aes_scheme_resolves_secret() {
        let params = json!({"name": "bob"});
        let canonical = "name=bob";
        let material = SecretMaterial::new("X1").with_aes("0123456789abcdef", "fedcba9876543210");
        let sign = SignatureProvider::for_signing(
            SignatureAlgorithm::Aes,
            Some(&material),
            DigestAlgorithm::Sha256,
        )
        .unwrap()
        .sign(canonical.as_bytes())
        .unwrap();
        let mut params = params;
        params["sign"] = json!(sign);

        let stage = middleware(SignatureStageConfig::default());
        let mut ctx = context("user.logout", params);
        let response = stage.process(&mut ctx, request(Some("aes")), handler()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(ctx.app_id(), Some("X1"));
        assert!(ctx.secret().is_some());
    }

    #[tokio::test]
    async fn test_unknown_algorithm_and_unruled_operations() {
        let stage = middleware(SignatureStageConfig::default());

        let mut ctx = context("user.login", json!({}));
        let response = stage.process(&mut ctx, request(Some("crc32")), handler()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let mut ctx = context("health", json!({}));
        let response = stage.process(&mut ctx, request(Some("crc32")), handler()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-sign-type").is_none());
    }

    #[tokio::test]
    async fn test_disabled_stage_is_transparent() {
        let config = SignatureStageConfig {
            enabled: false,
            ..SignatureStageConfig::default()
        };
        let stage = middleware(config);
        let mut ctx = context("user.login", json!({}));
        let response = stage.process(&mut ctx, request(None), handler()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body(response).await.data_object().unwrap().get("sign").is_none());
    }
}
