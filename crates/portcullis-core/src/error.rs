//! Error taxonomy for the request boundary.
//!
//! Every failure inside the pipeline is converted into a [`PortcullisError`]
//! at the stage that detected it. The error is then rendered into the
//! [`ApiResponse`](crate::ApiResponse) envelope; nothing else crosses the
//! request boundary.
//!
//! | Category            | HTTP | Envelope code |
//! |---------------------|------|---------------|
//! | `Validation`        | 400  | 4000          |
//! | `Decode`            | 400  | 4001          |
//! | `Crypto`            | 400  | 4002          |
//! | `SignatureMismatch` | 401  | 4010          |
//! | `Secret`            | 403  | 4030          |
//! | `Internal`          | 500  | 5000          |
//! | `Encoding`          | 500  | 5001          |

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`PortcullisError`].
pub type PortcullisResult<T> = Result<T, PortcullisError>;

/// Categories of boundary errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing signature, missing required field, malformed header.
    Validation,
    /// A decrypted value could not be decoded as JSON.
    Decode,
    /// Decryption or encryption failed.
    Crypto,
    /// The supplied signature does not match.
    SignatureMismatch,
    /// Key material is unknown, revoked, or incomplete.
    Secret,
    /// Outbound signing or encryption failed.
    Encoding,
    /// Unexpected failure.
    Internal,
}

impl ErrorCategory {
    /// Returns the HTTP status code for this category.
    #[must_use]
    pub const fn status_code(self) -> StatusCode {
        match self {
            Self::Validation | Self::Decode | Self::Crypto => StatusCode::BAD_REQUEST,
            Self::SignatureMismatch => StatusCode::UNAUTHORIZED,
            Self::Secret => StatusCode::FORBIDDEN,
            Self::Encoding | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the numeric code written into the response envelope.
    #[must_use]
    pub const fn envelope_code(self) -> u32 {
        match self {
            Self::Validation => 4000,
            Self::Decode => 4001,
            Self::Crypto => 4002,
            Self::SignatureMismatch => 4010,
            Self::Secret => 4030,
            Self::Internal => 5000,
            Self::Encoding => 5001,
        }
    }

    /// Returns true if the message must not be shown to clients.
    #[must_use]
    pub const fn is_opaque(self) -> bool {
        matches!(self, Self::Encoding | Self::Internal)
    }
}

/// Standard error type for the request boundary.
///
/// # Example
///
/// ```
/// use portcullis_core::{ErrorCategory, PortcullisError};
///
/// let err = PortcullisError::missing_parameter("password");
/// assert_eq!(err.category(), ErrorCategory::Validation);
/// assert_eq!(err.field(), Some("password"));
/// ```
#[derive(Error, Debug)]
pub enum PortcullisError {
    /// Input is malformed or incomplete.
    #[error("{message}")]
    Validation {
        /// Human-readable error message.
        message: String,
        /// The offending parameter, if any.
        field: Option<String>,
    },

    /// A decrypted value was not valid JSON.
    #[error("{message}")]
    Decode {
        /// Human-readable error message.
        message: String,
        /// The offending parameter, if any.
        field: Option<String>,
    },

    /// Decryption or encryption failed.
    #[error("{message}")]
    Crypto {
        /// Human-readable error message.
        message: String,
        /// The offending parameter, if any.
        field: Option<String>,
    },

    /// The signature did not verify.
    #[error("{message}")]
    SignatureMismatch {
        /// Human-readable error message.
        message: String,
    },

    /// Key material could not be resolved.
    #[error("{message}")]
    Secret {
        /// Human-readable error message.
        message: String,
    },

    /// The response could not be signed or encrypted.
    #[error("{message}")]
    Encoding {
        /// Human-readable error message (never shown to clients).
        message: String,
    },

    /// Unexpected failure.
    #[error("{message}")]
    Internal {
        /// Human-readable error message (never shown to clients).
        message: String,
        /// The underlying error.
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl PortcullisError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Creates a validation error naming the offending field.
    #[must_use]
    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates the error for a required parameter that is absent.
    #[must_use]
    pub fn missing_parameter(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::Validation {
            message: format!("missing parameter: {field}"),
            field: Some(field),
        }
    }

    /// Creates a JSON decode error for a decrypted field.
    #[must_use]
    pub fn decode(message: impl Into<String>, field: Option<String>) -> Self {
        Self::Decode {
            message: message.into(),
            field,
        }
    }

    /// Creates a crypto error.
    #[must_use]
    pub fn crypto(message: impl Into<String>, field: Option<String>) -> Self {
        Self::Crypto {
            message: message.into(),
            field,
        }
    }

    /// Creates a signature mismatch error.
    #[must_use]
    pub fn signature_mismatch(message: impl Into<String>) -> Self {
        Self::SignatureMismatch {
            message: message.into(),
        }
    }

    /// Creates a secret resolution error.
    #[must_use]
    pub fn secret(message: impl Into<String>) -> Self {
        Self::Secret {
            message: message.into(),
        }
    }

    /// Creates an outbound encoding error.
    #[must_use]
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error with a source error.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Decode { .. } => ErrorCategory::Decode,
            Self::Crypto { .. } => ErrorCategory::Crypto,
            Self::SignatureMismatch { .. } => ErrorCategory::SignatureMismatch,
            Self::Secret { .. } => ErrorCategory::Secret,
            Self::Encoding { .. } => ErrorCategory::Encoding,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        self.category().status_code()
    }

    /// Returns the field the error refers to, if any.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. }
            | Self::Decode { field, .. }
            | Self::Crypto { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}
