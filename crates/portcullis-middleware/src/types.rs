//! Request and response types used throughout the pipeline.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use portcullis_core::{ApiResponse, PortcullisError};
use serde_json::Value;

/// The HTTP request type used in the pipeline.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the pipeline.
pub type Response = http::Response<Full<Bytes>>;

/// Extension trait for building envelope responses.
pub trait ResponseExt {
    /// Creates a JSON response carrying `envelope`.
    fn envelope(status: StatusCode, envelope: &ApiResponse) -> Response;

    /// Creates a success envelope around `data`.
    fn ok(data: Value) -> Response;

    /// Creates the failure envelope for `error`, with its status code.
    fn failure(error: &PortcullisError) -> Response;
}

impl ResponseExt for Response {
    fn envelope(status: StatusCode, envelope: &ApiResponse) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(envelope.to_vec())));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }

    fn ok(data: Value) -> Response {
        Self::envelope(StatusCode::OK, &ApiResponse::ok(data))
    }

    fn failure(error: &PortcullisError) -> Response {
        Self::envelope(error.status_code(), &ApiResponse::from_error(error))
    }
}

/// Reads a whole body into memory.
pub(crate) async fn collect_body(body: Full<Bytes>) -> Bytes {
    match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    }
}

/// A handler response, opened for outbound processing.
pub(crate) enum Outbound {
    /// A success envelope whose `data` is an object.
    Envelope(http::response::Parts, ApiResponse),
    /// Anything else; passed through untouched.
    Untouched(Response),
}

impl Outbound {
    /// Reads the response body and decides whether it can be processed.
    pub(crate) async fn open(response: Response) -> Self {
        let (parts, body) = response.into_parts();
        let bytes = collect_body(body).await;
        match ApiResponse::from_slice(&bytes) {
            Some(envelope) if envelope.success && envelope.data.is_object() => {
                Self::Envelope(parts, envelope)
            }
            _ => Self::Untouched(http::Response::from_parts(parts, Full::new(bytes))),
        }
    }
}

/// Re-serializes a processed envelope into the original response head.
pub(crate) fn seal(mut parts: http::response::Parts, envelope: &ApiResponse) -> Response {
    parts.headers.remove(CONTENT_LENGTH);
    http::Response::from_parts(parts, Full::new(Bytes::from(envelope.to_vec())))
}
