//! Error types for canonicalization, ciphers, signatures and secrets.

use crate::secret::KeyKind;
use portcullis_cache::StoreError;
use thiserror::Error;

/// Errors building a canonical string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CanonicalError {
    /// A required parameter is absent or null.
    #[error("missing parameter: {0}")]
    MissingParameter(String),
}

/// Errors from ciphers and signature providers.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The header token names no supported algorithm.
    #[error("unsupported algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Key material has the wrong size or cannot be parsed.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// The secret material lacks the key this operation needs.
    #[error("key material has no {0}")]
    MissingKey(KeyKind),

    /// The input is not valid base64 or not a whole number of blocks.
    #[error("malformed ciphertext: {0}")]
    MalformedInput(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptFailed(String),

    /// Decryption failed.
    #[error("decryption failed: {0}")]
    DecryptFailed(String),

    /// Signing failed.
    #[error("signing failed: {0}")]
    SignFailed(String),

    /// The operation does not match the direction the provider was built for.
    #[error("{0} is not available in this direction")]
    WrongDirection(&'static str),
}

/// Errors resolving per-application key material.
#[derive(Error, Debug)]
pub enum SecretError {
    /// The application id header is not valid.
    #[error("invalid application id: {0}")]
    InvalidAppId(String),

    /// No material exists for the application.
    #[error("unknown application: {0}")]
    UnknownApp(String),

    /// The application's material has been revoked.
    #[error("application {0} is revoked")]
    Revoked(String),

    /// The material lacks a required key kind.
    #[error("application {app_id} has no {kind}")]
    MissingKey {
        /// The application id.
        app_id: String,
        /// The missing key kind.
        kind: KeyKind,
    },

    /// The source of truth failed.
    #[error("secret source failed: {0}")]
    Source(String),

    /// The cache store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SecretError {
    /// Creates a source error.
    #[must_use]
    pub fn source_failed(message: impl Into<String>) -> Self {
        Self::Source(message.into())
    }
}
