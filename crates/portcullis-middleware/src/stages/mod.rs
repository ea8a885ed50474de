//! The standard pipeline stages, outermost first.
//!
//! 1. [`error_normalization`] - envelope for every bare error response
//! 2. [`request_id`] - take or generate the request ID
//! 3. [`parameters`] - merge query and body into the parameter map
//! 4. [`crypto`] - decrypt requests, encrypt responses
//! 5. [`signature`] - verify requests, sign responses
//!
//! Crypto wraps signature, so inbound decrypts before verifying and
//! outbound signs before encrypting.

pub mod crypto;
pub mod error_normalization;
pub mod parameters;
pub mod request_id;
pub mod signature;

pub use crypto::CryptoMiddleware;
pub use error_normalization::ErrorNormalizationMiddleware;
pub use parameters::ParametersMiddleware;
pub use request_id::{RequestIdMiddleware, REQUEST_ID_HEADER};
pub use signature::SignatureMiddleware;
