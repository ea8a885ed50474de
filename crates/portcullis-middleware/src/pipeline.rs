//! Fixed-order middleware pipeline.
//!
//! ## Stages
//!
//! Outermost first:
//!
//! 1. **Error Normalization** - turn stray error responses into envelopes
//! 2. **Request ID** - take or generate the request ID, echo it back
//! 3. **Parameters** - merge query and body into the parameter map
//! 4. **Crypto** - decrypt inbound fields, encrypt outbound fields
//! 5. **Signature** - verify the inbound `sign`, sign the outbound `data`
//!
//! Because crypto wraps signature, inbound processing runs decrypt then
//! verify and outbound processing runs sign then encrypt.

use crate::config::PipelineConfig;
use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::stages::{
    CryptoMiddleware, ErrorNormalizationMiddleware, ParametersMiddleware, RequestIdMiddleware,
    SignatureMiddleware,
};
use crate::types::{Request, Response};
use portcullis_crypto::SecretResolver;
use std::sync::Arc;

/// A type-erased stage.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// An immutable chain of stages in front of a handler.
///
/// # Example
///
/// ```ignore
/// let pipeline = Pipeline::standard(&config, resolver);
/// let response = pipeline
///     .process(MiddlewareContext::for_operation("user.login"), request, |ctx, _req| {
///         let name = ctx.params().get("name").cloned();
///         Box::pin(async move { Response::ok(json!({ "name": name })) })
///     })
///     .await;
/// ```
pub struct Pipeline {
    stages: Vec<BoxedMiddleware>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Builds the standard five-stage pipeline from configuration.
    #[must_use]
    pub fn standard(config: &PipelineConfig, resolver: Arc<SecretResolver>) -> Self {
        let headers = Arc::new(config.headers.clone());
        let rules = Arc::new(config.rules.clone());

        Self::builder()
            .add_stage(ErrorNormalizationMiddleware::new())
            .add_stage(RequestIdMiddleware::new(headers.request_id.clone()))
            .add_stage(ParametersMiddleware::new())
            .add_stage(CryptoMiddleware::new(
                config.crypto.clone(),
                Arc::clone(&headers),
                Arc::clone(&rules),
                Arc::clone(&resolver),
            ))
            .add_stage(SignatureMiddleware::new(
                config.signature.clone(),
                headers,
                rules,
                resolver,
            ))
            .build()
    }

    /// Runs a request through every stage, then the handler.
    pub async fn process<H>(
        &self,
        mut ctx: MiddlewareContext,
        request: Request,
        handler: H,
    ) -> Response
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'static,
    {
        let next = self.build_chain(handler);
        next.run(&mut ctx, request).await
    }

    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        let mut next = Next::handler(handler);
        for middleware in self.stages.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }
        next
    }

    /// Returns the stage names, outermost first.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|mw| mw.name()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

/// Builder for a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage inside the ones already added.
    #[must_use]
    pub fn add_stage<M: Middleware>(mut self, middleware: M) -> Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

/// The standard stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Error envelope normalization.
    ErrorNormalization = 1,
    /// Request ID propagation.
    RequestId = 2,
    /// Parameter extraction.
    Parameters = 3,
    /// Payload decryption and encryption.
    Crypto = 4,
    /// Signature verification and generation.
    Signature = 5,
}

impl Stage {
    /// Returns the stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ErrorNormalization => "error_normalization",
            Self::RequestId => "request_id",
            Self::Parameters => "parameters",
            Self::Crypto => "crypto",
            Self::Signature => "signature",
        }
    }

    /// Returns all stages in order.
    #[must_use]
    pub const fn all() -> [Stage; 5] {
        [
            Self::ErrorNormalization,
            Self::RequestId,
            Self::Parameters,
            Self::Crypto,
            Self::Signature,
        ]
    }
}
