//! # Portcullis Middleware
//!
//! The request boundary pipeline. Requests pass through five stages before
//! the handler, and responses pass back out through the same stages:
//!
//! ```text
//! Request → ErrorNorm → RequestId → Parameters → Crypto → Signature → Handler
//!                                                                        ↓
//! Response ← ErrorNorm ← RequestId ← Parameters ← Crypto ← Signature ←──┘
//! ```
//!
//! | Stage | Middleware          | Purpose                                      |
//! |-------|---------------------|----------------------------------------------|
//! | 1     | Error Normalization | Envelope for bare error responses            |
//! | 2     | Request ID          | Take or generate the request ID              |
//! | 3     | Parameters          | Merge query and body into one parameter map  |
//! | 4     | Crypto              | Decrypt request fields, encrypt response data |
//! | 5     | Signature           | Verify request signature, sign response data |
//!
//! Crypto and signature only act on operations that have a
//! [`SigningRule`](config::SigningRule), and only when enabled.
//!
//! ## Example
//!
//! ```
//! use portcullis_middleware::pipeline::Stage;
//!
//! let stages = Stage::all();
//! assert_eq!(stages.len(), 5);
//! assert_eq!(stages[0].name(), "error_normalization");
//! assert_eq!(stages[4].name(), "signature");
//! ```

#![doc(html_root_url = "https://docs.rs/portcullis-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod cipher_header;
pub mod config;
pub mod context;
mod exchange;
pub mod middleware;
pub mod pipeline;
pub mod stages;
pub mod types;

pub use cipher_header::{CipherSelection, FieldSelector};
pub use config::{
    CanonicalOptions, CryptoStageConfig, HeaderNames, PipelineConfig, SignatureStageConfig,
    SigningRule, SigningRules,
};
pub use context::MiddlewareContext;
pub use middleware::{BoxFuture, Middleware, Next};
pub use pipeline::{Pipeline, PipelineBuilder, Stage};
pub use types::{Request, Response, ResponseExt};
