//! The JSON response envelope.
//!
//! ```json
//! { "success": true, "code": 200, "message": "ok", "data": { ... } }
//! ```
//!
//! Signature and cipher stages only ever touch `data`.

use crate::error::PortcullisError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Envelope code of a successful response.
pub const SUCCESS_CODE: u32 = 200;

/// Message used in place of internal error details.
const OPAQUE_MESSAGE: &str = "internal error";

/// Response envelope produced by handlers and by the pipeline itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Whether the request succeeded.
    pub success: bool,
    /// Numeric result code.
    pub code: u32,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Response payload.
    #[serde(default = "empty_object")]
    pub data: Value,
    /// Any other top-level members, preserved as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl ApiResponse {
    /// Creates a success envelope around `data`.
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            code: SUCCESS_CODE,
            message: "ok".to_string(),
            data,
            extra: Map::new(),
        }
    }

    /// Creates a failure envelope for an error.
    ///
    /// Messages of opaque categories are replaced so internal details and
    /// key material never reach the client.
    #[must_use]
    pub fn from_error(error: &PortcullisError) -> Self {
        let category = error.category();
        let message = if category.is_opaque() {
            OPAQUE_MESSAGE.to_string()
        } else {
            error.to_string()
        };
        Self::failure(category.envelope_code(), message)
    }

    /// Creates a failure envelope with an explicit code and message.
    #[must_use]
    pub fn failure(code: u32, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code,
            message: message.into(),
            data: empty_object(),
            extra: Map::new(),
        }
    }

    /// Parses an envelope from a JSON body.
    ///
    /// Returns `None` when the body is not a JSON object carrying at least
    /// `success` and `code`.
    #[must_use]
    pub fn from_slice(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }

    /// Returns the payload as an object, if it is one.
    #[must_use]
    pub fn data_object(&self) -> Option<&Map<String, Value>> {
        self.data.as_object()
    }

    /// Returns the payload as a mutable object, if it is one.
    pub fn data_object_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.data.as_object_mut()
    }

    /// Serializes the envelope to JSON bytes.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        // Serializing a struct of strings, numbers and `Value` cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}
