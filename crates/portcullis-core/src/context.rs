//! Request identifier.
//!
//! Clients send an opaque `x-request-id` that doubles as the salt of some
//! signature schemes, so the identifier is kept as the exact text the client
//! supplied. When the client sends nothing a UUID v7 is generated.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Longest client-supplied request ID that is accepted.
pub const MAX_REQUEST_ID_LEN: usize = 128;

/// An opaque identifier for one request/response exchange.
///
/// # Example
///
/// ```
/// use portcullis_core::RequestId;
///
/// let generated = RequestId::new();
/// assert!(!generated.as_str().is_empty());
///
/// let supplied = RequestId::parse("req-42").unwrap();
/// assert_eq!(supplied.as_str(), "req-42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Arc<str>);

impl RequestId {
    /// Generates a fresh, time-ordered request ID (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string().into())
    }

    /// Accepts a client-supplied request ID.
    ///
    /// Surrounding whitespace is trimmed. Returns `None` when the value is
    /// empty, longer than [`MAX_REQUEST_ID_LEN`], or contains anything other
    /// than visible ASCII.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_REQUEST_ID_LEN {
            return None;
        }
        if !trimmed.bytes().all(|b| b.is_ascii_graphic()) {
            return None;
        }
        Some(Self(trimmed.into()))
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string().into())
    }
}
