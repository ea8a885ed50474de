//! # Portcullis Core
//!
//! Core types shared by every Portcullis crate.
//!
//! - [`RequestId`] - Opaque per-exchange identifier, also used as signature salt
//! - [`PortcullisError`] - Boundary error taxonomy
//! - [`ErrorCategory`] - Classification with HTTP status and envelope code
//! - [`ApiResponse`] - The `{success, code, message, data}` response envelope

#![doc(html_root_url = "https://docs.rs/portcullis-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod envelope;
mod error;

pub use context::RequestId;
pub use envelope::{ApiResponse, SUCCESS_CODE};
pub use error::{ErrorCategory, PortcullisError, PortcullisResult};
