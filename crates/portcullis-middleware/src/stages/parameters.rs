//! Parameter extraction middleware.
//!
//! Builds the request's parameter map: query string first, then the body
//! (`application/json` objects or `application/x-www-form-urlencoded`),
//! later sources overwriting earlier ones. The raw body is kept on the
//! context for combined-mode decryption; any other content type contributes
//! only its raw body.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{collect_body, Request, Response, ResponseExt};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http_body_util::Full;
use portcullis_core::PortcullisError;
use serde_json::{Map, Value};
use tracing::debug;

/// Middleware that merges query and body parameters into the context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParametersMiddleware;

impl ParametersMiddleware {
    /// Creates the middleware.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Form,
    Raw,
}

impl BodyKind {
    fn of(request: &Request) -> Self {
        let Some(content_type) = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
        else {
            return Self::Raw;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence == "application/json" || essence.ends_with("+json") {
            Self::Json
        } else if essence == "application/x-www-form-urlencoded" {
            Self::Form
        } else {
            Self::Raw
        }
    }
}

fn merge_pairs(params: &mut Map<String, Value>, encoded: &[u8]) -> Result<(), PortcullisError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(encoded)
        .map_err(|_| PortcullisError::validation("malformed form parameters"))?;
    for (key, value) in pairs {
        params.insert(key, Value::String(value));
    }
    Ok(())
}

/// Parses the query string and body into a parameter map.
fn extract(
    query: Option<&str>,
    kind: BodyKind,
    body: &Bytes,
) -> Result<Map<String, Value>, PortcullisError> {
    let mut params = Map::new();
    if let Some(query) = query {
        merge_pairs(&mut params, query.as_bytes())?;
    }

    match kind {
        BodyKind::Json if !body.iter().all(u8::is_ascii_whitespace) => {
            match serde_json::from_slice::<Value>(body) {
                Ok(Value::Object(object)) => params.extend(object),
                _ => return Err(PortcullisError::validation("request body must be a JSON object")),
            }
        }
        BodyKind::Form => merge_pairs(&mut params, body)?,
        BodyKind::Json | BodyKind::Raw => {}
    }
    Ok(params)
}

impl Middleware for ParametersMiddleware {
    fn name(&self) -> &'static str {
        "parameters"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let kind = BodyKind::of(&request);
            let (parts, body) = request.into_parts();
            let body = collect_body(body).await;

            let params = match extract(parts.uri.query(), kind, &body) {
                Ok(params) => params,
                Err(err) => {
                    debug!(request_id = %ctx.request_id(), error = %err, "rejecting parameters");
                    return Response::failure(&err);
                }
            };
            debug!(
                request_id = %ctx.request_id(),
                count = params.len(),
                "parameters extracted"
            );

            ctx.params_mut().extend(params);
            ctx.set_raw_body(body.clone());
            let request = http::Request::from_parts(parts, Full::new(body));
            next.run(ctx, request).await
        })
    }
}
