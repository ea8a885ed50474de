//! # Portcullis Crypto
//!
//! The cryptographic building blocks of the request boundary:
//!
//! - [`CanonicalBuilder`] - deterministic `key=value&...` strings for signing
//! - [`Cipher`] - AES-CBC and chunked RSA payload encryption
//! - [`SignatureProvider`] - digest, symmetric-MAC and RSA signatures
//! - [`SecretResolver`] - cache-first lookup of per-application key material
//!
//! ## Directionality
//!
//! Key direction is fixed by the constructor, never by caller input:
//!
//! | operation        | AES              | RSA                    |
//! |------------------|------------------|------------------------|
//! | inbound decrypt  | shared key + IV  | server private key     |
//! | outbound encrypt | shared key + IV  | user public key        |
//! | verify           | shared key + IV  | user public key        |
//! | sign             | shared key + IV  | server private key     |

#![doc(html_root_url = "https://docs.rs/portcullis-crypto/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod canonical;
mod cipher;
mod error;
mod secret;
mod signature;

pub use canonical::{
    render_value, CanonicalBuilder, CanonicalSuffix, KeyOrder, Strictness, SuffixContext,
    DEFAULT_CREDENTIAL_FIELD, SIGN_FIELD,
};
pub use cipher::{AesCbcCipher, Cipher, CipherAlgorithm, RsaDecryptor, RsaEncryptor, RsaPadding};
pub use error::{CanonicalError, CryptoError, SecretError};
pub use secret::{
    decode_app_id, AesMaterial, KeyKind, RsaMaterial, SecretConfig, SecretMaterial,
    SecretResolver, SecretSource, SecretStatus, StaticSecretSource,
};
pub use signature::{DigestAlgorithm, SignatureAlgorithm, SignatureProvider};
