//! Error normalization middleware.
//!
//! The outermost stage. Every 4xx or 5xx response that is not already an
//! envelope is rewritten into one, so clients see a single failure shape
//! whether the error came from a stage, the handler or the host:
//!
//! ```json
//! {"success": false, "code": 4040, "message": "Not Found", "data": {}}
//! ```
//!
//! Server errors are always reported as `5000 internal error`.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{collect_body, Request, Response, ResponseExt};
use portcullis_core::{ApiResponse, ErrorCategory};
use tracing::{debug, info};

/// Longest handler body reused verbatim as a failure message.
const MAX_MESSAGE_LEN: usize = 256;

/// Middleware that turns bare error responses into envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorNormalizationMiddleware;

impl ErrorNormalizationMiddleware {
    /// Creates the middleware.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    async fn normalize(&self, ctx: &MiddlewareContext, response: Response) -> Response {
        let status = response.status();
        if !status.is_client_error() && !status.is_server_error() {
            return response;
        }

        let (parts, body) = response.into_parts();
        let body = collect_body(body).await;
        if ApiResponse::from_slice(&body).is_some() {
            return http::Response::from_parts(parts, http_body_util::Full::new(body));
        }

        let envelope = if status.is_server_error() {
            ApiResponse::failure(ErrorCategory::Internal.envelope_code(), "internal error")
        } else {
            let message = std::str::from_utf8(&body)
                .ok()
                .map(str::trim)
                .filter(|text| !text.is_empty() && text.len() <= MAX_MESSAGE_LEN)
                .map(str::to_string)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            ApiResponse::failure(u32::from(status.as_u16()) * 10, message)
        };
        debug!(
            request_id = %ctx.request_id(),
            status = status.as_u16(),
            code = envelope.code,
            "normalized bare error response"
        );

        let mut normalized = Response::envelope(status, &envelope);
        for (name, value) in &parts.headers {
            if name != http::header::CONTENT_TYPE && name != http::header::CONTENT_LENGTH {
                normalized.headers_mut().append(name, value.clone());
            }
        }
        normalized
    }
}

impl Middleware for ErrorNormalizationMiddleware {
    fn name(&self) -> &'static str {
        "error_normalization"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let response = next.run(ctx, request).await;
            let response = self.normalize(ctx, response).await;
            info!(
                request_id = %ctx.request_id(),
                operation_id = ?ctx.operation_id(),
                status = response.status().as_u16(),
                elapsed_ms = u64::try_from(ctx.elapsed().as_millis()).unwrap_or(u64::MAX),
                "request completed"
            );
            response
        })
    }
}
