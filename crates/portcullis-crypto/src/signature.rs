//! Signature providers.
//!
//! Three families share one interface:
//!
//! - digest: `sign = hex(hash(data))`, no secret
//! - symmetric MAC: `sign = aes(hex(hash(data)))` with the application's AES
//!   key, verified by decrypting the signature
//! - asymmetric: RSA PKCS#1 v1.5 over SHA-256, base64 encoded
//!
//! Digest comparisons run in constant time.

use crate::cipher::{parse_private_key, parse_public_key, AesCbcCipher};
use crate::error::CryptoError;
use crate::secret::{KeyKind, SecretMaterial};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;

/// Hash function of digest signatures and of the symmetric MAC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestAlgorithm {
    /// MD5.
    Md5,
    /// SHA-1.
    Sha1,
    /// SHA-256.
    #[default]
    Sha256,
}

impl DigestAlgorithm {
    /// Returns the lowercase hex digest of `data`.
    #[must_use]
    pub fn hex_digest(self, data: &[u8]) -> String {
        match self {
            Self::Md5 => hex::encode(md5::Md5::digest(data)),
            Self::Sha1 => hex::encode(sha1::Sha1::digest(data)),
            Self::Sha256 => hex::encode(Sha256::digest(data)),
        }
    }
}

/// Signature algorithm selected by the request header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAlgorithm {
    /// MD5 digest.
    #[default]
    Md5,
    /// SHA-1 digest.
    Sha1,
    /// SHA-256 digest.
    Sha256,
    /// AES-encrypted digest.
    Aes,
    /// RSA signature.
    Rsa,
}

impl SignatureAlgorithm {
    /// Returns the header token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Aes => "aes",
            Self::Rsa => "rsa",
        }
    }

    /// Returns true if the algorithm needs per-application key material.
    #[must_use]
    pub const fn needs_secret(self) -> bool {
        matches!(self, Self::Aes | Self::Rsa)
    }

    /// Key kinds needed to verify inbound signatures.
    #[must_use]
    pub const fn verification_keys(self) -> &'static [KeyKind] {
        match self {
            Self::Md5 | Self::Sha1 | Self::Sha256 => &[],
            Self::Aes => &[KeyKind::AesKey],
            Self::Rsa => &[KeyKind::UserPublicKey],
        }
    }

    /// Key kinds needed to sign outbound payloads.
    #[must_use]
    pub const fn signing_keys(self) -> &'static [KeyKind] {
        match self {
            Self::Md5 | Self::Sha1 | Self::Sha256 => &[],
            Self::Aes => &[KeyKind::AesKey],
            Self::Rsa => &[KeyKind::ServerPrivateKey],
        }
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = CryptoError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "aes" => Ok(Self::Aes),
            "rsa" => Ok(Self::Rsa),
            other => Err(CryptoError::UnknownAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
enum RsaSignatureKey {
    Signing(SigningKey<Sha256>),
    Verifying(VerifyingKey<Sha256>),
}

/// A signature provider bound to one direction of one exchange.
///
/// # Example
///
/// ```
/// use portcullis_crypto::{DigestAlgorithm, SignatureProvider};
///
/// let provider = SignatureProvider::digest(DigestAlgorithm::Md5);
/// let sign = provider.sign(b"name=bob").unwrap();
/// assert!(provider.verify(b"name=bob", &sign));
/// assert!(!provider.verify(b"name=bot", &sign));
/// ```
#[derive(Clone)]
pub enum SignatureProvider {
    /// Plain digest; no secret.
    Digest(DigestAlgorithm),
    /// Digest encrypted with the application's AES key.
    SymmetricMac {
        /// The application's AES cipher.
        cipher: AesCbcCipher,
        /// The digest that is encrypted.
        digest: DigestAlgorithm,
    },
    /// RSA over SHA-256.
    Asymmetric(AsymmetricKey),
}

/// The RSA key of an asymmetric provider.
#[derive(Clone)]
pub struct AsymmetricKey(RsaSignatureKey);

impl fmt::Debug for SignatureProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Digest(digest) => f.debug_tuple("Digest").field(digest).finish(),
            Self::SymmetricMac { digest, .. } => f
                .debug_struct("SymmetricMac")
                .field("digest", digest)
                .finish_non_exhaustive(),
            Self::Asymmetric(AsymmetricKey(RsaSignatureKey::Signing(_))) => {
                f.write_str("Asymmetric(signing)")
            }
            Self::Asymmetric(AsymmetricKey(RsaSignatureKey::Verifying(_))) => {
                f.write_str("Asymmetric(verifying)")
            }
        }
    }
}

impl SignatureProvider {
    /// Creates a digest provider.
    #[must_use]
    pub const fn digest(algorithm: DigestAlgorithm) -> Self {
        Self::Digest(algorithm)
    }

    /// Builds the provider that verifies inbound signatures: the shared AES
    /// key, or the user's public key.
    pub fn for_verification(
        algorithm: SignatureAlgorithm,
        material: Option<&SecretMaterial>,
        mac_digest: DigestAlgorithm,
    ) -> Result<Self, CryptoError> {
        match algorithm {
            SignatureAlgorithm::Md5 => Ok(Self::Digest(DigestAlgorithm::Md5)),
            SignatureAlgorithm::Sha1 => Ok(Self::Digest(DigestAlgorithm::Sha1)),
            SignatureAlgorithm::Sha256 => Ok(Self::Digest(DigestAlgorithm::Sha256)),
            SignatureAlgorithm::Aes => Ok(Self::SymmetricMac {
                cipher: require(material, KeyKind::AesKey)?.aes_cipher()?,
                digest: mac_digest,
            }),
            SignatureAlgorithm::Rsa => {
                let pem = require(material, KeyKind::UserPublicKey)?
                    .rsa
                    .user_public_key
                    .as_deref()
                    .ok_or(CryptoError::MissingKey(KeyKind::UserPublicKey))?;
                let key = VerifyingKey::<Sha256>::new(parse_public_key(pem)?);
                Ok(Self::Asymmetric(AsymmetricKey(RsaSignatureKey::Verifying(key))))
            }
        }
    }

    /// Builds the provider that signs outbound payloads: the shared AES key,
    /// or the server's private key.
    pub fn for_signing(
        algorithm: SignatureAlgorithm,
        material: Option<&SecretMaterial>,
        mac_digest: DigestAlgorithm,
    ) -> Result<Self, CryptoError> {
        match algorithm {
            SignatureAlgorithm::Md5 | SignatureAlgorithm::Sha1 | SignatureAlgorithm::Sha256 => {
                Self::for_verification(algorithm, None, mac_digest)
            }
            SignatureAlgorithm::Aes => Ok(Self::SymmetricMac {
                cipher: require(material, KeyKind::AesKey)?.aes_cipher()?,
                digest: mac_digest,
            }),
            SignatureAlgorithm::Rsa => {
                let pem = require(material, KeyKind::ServerPrivateKey)?
                    .rsa
                    .server_private_key
                    .as_deref()
                    .ok_or(CryptoError::MissingKey(KeyKind::ServerPrivateKey))?;
                let key = SigningKey::<Sha256>::new(parse_private_key(pem)?);
                Ok(Self::Asymmetric(AsymmetricKey(RsaSignatureKey::Signing(key))))
            }
        }
    }

    /// Signs `data`.
    ///
    /// # Errors
    ///
    /// [`CryptoError::WrongDirection`] on a verifying RSA provider, or the
    /// cipher's error for a MAC.
    pub fn sign(&self, data: &[u8]) -> Result<String, CryptoError> {
        match self {
            Self::Digest(digest) => Ok(digest.hex_digest(data)),
            Self::SymmetricMac { cipher, digest } => {
                cipher.encrypt(digest.hex_digest(data).as_bytes())
            }
            Self::Asymmetric(AsymmetricKey(RsaSignatureKey::Signing(key))) => {
                let signature = key
                    .try_sign(data)
                    .map_err(|e| CryptoError::SignFailed(e.to_string()))?;
                Ok(STANDARD.encode(signature.to_bytes()))
            }
            Self::Asymmetric(AsymmetricKey(RsaSignatureKey::Verifying(_))) => {
                Err(CryptoError::WrongDirection("rsa signing"))
            }
        }
    }

    /// Returns true if `signature` is valid for `data`.
    ///
    /// Malformed signatures and a signing-only RSA provider verify as false.
    #[must_use]
    pub fn verify(&self, data: &[u8], signature: &str) -> bool {
        match self {
            Self::Digest(digest) => {
                constant_time_eq(digest.hex_digest(data).as_bytes(), signature.as_bytes())
            }
            Self::SymmetricMac { cipher, digest } => match cipher.decrypt(signature) {
                Ok(decrypted) => {
                    constant_time_eq(digest.hex_digest(data).as_bytes(), &decrypted)
                }
                Err(_) => false,
            },
            Self::Asymmetric(AsymmetricKey(RsaSignatureKey::Verifying(key))) => {
                let Ok(raw) = STANDARD.decode(signature.trim()) else {
                    return false;
                };
                let Ok(signature) = Signature::try_from(raw.as_slice()) else {
                    return false;
                };
                key.verify(data, &signature).is_ok()
            }
            Self::Asymmetric(AsymmetricKey(RsaSignatureKey::Signing(_))) => false,
        }
    }
}

fn require(
    material: Option<&SecretMaterial>,
    kind: KeyKind,
) -> Result<&SecretMaterial, CryptoError> {
    material.ok_or(CryptoError::MissingKey(kind))
}

fn constant_time_eq(expected: &[u8], received: &[u8]) -> bool {
    expected.len() == received.len() && bool::from(expected.ct_eq(received))
}
