//! Request ID middleware.
//!
//! Clients send an opaque request ID that some signature schemes use as a
//! salt, so a well-formed incoming ID is always kept verbatim. Without one
//! a UUID v7 is generated. The ID in use is echoed on every response.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use http::header::{HeaderName, HeaderValue};
use portcullis_core::RequestId;
use tracing::{debug, warn};

/// The default header name for request ID propagation.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Middleware that takes or generates the request ID.
#[derive(Debug, Clone)]
pub struct RequestIdMiddleware {
    header: String,
}

impl Default for RequestIdMiddleware {
    fn default() -> Self {
        Self::new(REQUEST_ID_HEADER)
    }
}

impl RequestIdMiddleware {
    /// Creates the middleware reading and writing `header`.
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }

    fn extract_request_id(&self, request: &Request) -> Option<RequestId> {
        request
            .headers()
            .get(self.header.as_str())
            .and_then(|value| value.to_str().ok())
            .and_then(RequestId::parse)
    }
}

impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &'static str {
        "request_id"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let request_id = self
                .extract_request_id(&request)
                .unwrap_or_else(RequestId::new);
            debug!(request_id = %request_id, operation_id = ?ctx.operation_id(), "request received");
            ctx.set_request_id(request_id.clone());

            let mut response = next.run(ctx, request).await;

            match (
                HeaderName::from_bytes(self.header.as_bytes()),
                HeaderValue::from_str(request_id.as_str()),
            ) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().insert(name, value);
                }
                _ => warn!(header = %self.header, "could not echo request id"),
            }

            response
        })
    }
}
