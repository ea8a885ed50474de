//! Payload ciphers.
//!
//! Ciphertext always travels as standard base64. RSA payloads longer than
//! one block are split into chunks that fit the padding, encrypted one by
//! one and concatenated; each encrypted chunk is exactly one modulus long.

use crate::error::CryptoError;
use crate::secret::{KeyKind, SecretMaterial};
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// AES block and IV size in bytes.
const AES_IV_LEN: usize = 16;

/// Payload encryption algorithm selected by the request header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherAlgorithm {
    /// AES-CBC with the application's shared key.
    #[default]
    Aes,
    /// RSA with the application's key pair.
    Rsa,
}

impl CipherAlgorithm {
    /// Returns the header token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Aes => "aes",
            Self::Rsa => "rsa",
        }
    }

    /// Key kinds needed to decrypt requests.
    #[must_use]
    pub const fn decryption_keys(self) -> &'static [KeyKind] {
        match self {
            Self::Aes => &[KeyKind::AesKey],
            Self::Rsa => &[KeyKind::ServerPrivateKey],
        }
    }

    /// Key kinds needed to encrypt responses.
    #[must_use]
    pub const fn encryption_keys(self) -> &'static [KeyKind] {
        match self {
            Self::Aes => &[KeyKind::AesKey],
            Self::Rsa => &[KeyKind::UserPublicKey],
        }
    }
}

impl FromStr for CipherAlgorithm {
    type Err = CryptoError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.trim().to_ascii_lowercase().as_str() {
            "aes" => Ok(Self::Aes),
            "rsa" => Ok(Self::Rsa),
            other => Err(CryptoError::UnknownAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RSA padding scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsaPadding {
    /// PKCS#1 v1.5 (11 bytes of overhead per block).
    #[default]
    Pkcs1v15,
    /// OAEP with SHA-1 (42 bytes of overhead per block).
    OaepSha1,
}

impl RsaPadding {
    /// Bytes of each block taken by padding.
    #[must_use]
    pub const fn overhead(self) -> usize {
        match self {
            Self::Pkcs1v15 => 11,
            Self::OaepSha1 => 42,
        }
    }
}

/// AES in CBC mode with PKCS#7 padding, bound to one key and IV.
///
/// The key length picks the variant: 16, 24 or 32 bytes for AES-128, -192
/// or -256.
#[derive(Clone)]
pub struct AesCbcCipher {
    key: Vec<u8>,
    iv: [u8; AES_IV_LEN],
}

impl fmt::Debug for AesCbcCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesCbcCipher")
            .field("key_bits", &(self.key.len() * 8))
            .finish_non_exhaustive()
    }
}

impl AesCbcCipher {
    /// Binds a key and IV.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] for an unsupported key length or
    /// an IV that is not 16 bytes.
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(CryptoError::InvalidKey(format!(
                "aes key must be 16, 24 or 32 bytes, got {}",
                key.len()
            )));
        }
        let iv: [u8; AES_IV_LEN] = iv.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("aes iv must be {AES_IV_LEN} bytes, got {}", iv.len()))
        })?;
        Ok(Self {
            key: key.to_vec(),
            iv,
        })
    }

    /// Encrypts `plaintext` and returns base64 ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let ciphertext = self.encrypt_raw(plaintext)?;
        Ok(STANDARD.encode(ciphertext))
    }

    /// Decrypts base64 ciphertext.
    ///
    /// An empty plaintext decrypts to `Ok(vec![])`; every failure is an
    /// `Err`.
    pub fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, CryptoError> {
        let raw = STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| CryptoError::MalformedInput(e.to_string()))?;
        if raw.is_empty() || raw.len() % AES_IV_LEN != 0 {
            return Err(CryptoError::MalformedInput(format!(
                "ciphertext length {} is not a positive multiple of {AES_IV_LEN}",
                raw.len()
            )));
        }
        self.decrypt_raw(&raw)
    }

    fn encrypt_raw(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let invalid = |e: aes::cipher::InvalidLength| CryptoError::InvalidKey(e.to_string());
        let out = match self.key.len() {
            16 => cbc::Encryptor::<aes::Aes128>::new_from_slices(&self.key, &self.iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            24 => cbc::Encryptor::<aes::Aes192>::new_from_slices(&self.key, &self.iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            _ => cbc::Encryptor::<aes::Aes256>::new_from_slices(&self.key, &self.iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        };
        Ok(out)
    }

    fn decrypt_raw(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let invalid = |e: aes::cipher::InvalidLength| CryptoError::InvalidKey(e.to_string());
        let unpad = |_: aes::cipher::block_padding::UnpadError| {
            CryptoError::DecryptFailed("bad padding".to_string())
        };
        match self.key.len() {
            16 => cbc::Decryptor::<aes::Aes128>::new_from_slices(&self.key, &self.iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(unpad),
            24 => cbc::Decryptor::<aes::Aes192>::new_from_slices(&self.key, &self.iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(unpad),
            _ => cbc::Decryptor::<aes::Aes256>::new_from_slices(&self.key, &self.iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(unpad),
        }
    }
}

/// Parses an RSA public key from SPKI or PKCS#1 PEM, or a bare base64 body.
pub(crate) fn parse_public_key(text: &str) -> Result<RsaPublicKey, CryptoError> {
    let text = text.trim();
    if text.contains("-----BEGIN") {
        return RsaPublicKey::from_public_key_pem(text)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(text))
            .map_err(|e| CryptoError::InvalidKey(format!("rsa public key: {e}")));
    }
    RsaPublicKey::from_public_key_pem(&armor(text, "PUBLIC KEY"))
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(&armor(text, "RSA PUBLIC KEY")))
        .map_err(|e| CryptoError::InvalidKey(format!("rsa public key: {e}")))
}

/// Parses an RSA private key from PKCS#8 or PKCS#1 PEM, or a bare base64 body.
pub(crate) fn parse_private_key(text: &str) -> Result<RsaPrivateKey, CryptoError> {
    let text = text.trim();
    if text.contains("-----BEGIN") {
        return RsaPrivateKey::from_pkcs8_pem(text)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(text))
            .map_err(|e| CryptoError::InvalidKey(format!("rsa private key: {e}")));
    }
    RsaPrivateKey::from_pkcs8_pem(&armor(text, "PRIVATE KEY"))
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&armor(text, "RSA PRIVATE KEY")))
        .map_err(|e| CryptoError::InvalidKey(format!("rsa private key: {e}")))
}

/// Wraps a bare base64 key body in PEM armor with 64-column lines.
fn armor(body: &str, label: &str) -> String {
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pem = format!("-----BEGIN {label}-----\n");
    for line in compact.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {label}-----\n"));
    pem
}

/// Chunked RSA encryption with a public key.
#[derive(Debug, Clone)]
pub struct RsaEncryptor {
    key: RsaPublicKey,
    padding: RsaPadding,
}

impl RsaEncryptor {
    /// Binds a public key given as PEM.
    pub fn from_pem(pem: &str, padding: RsaPadding) -> Result<Self, CryptoError> {
        Ok(Self::new(parse_public_key(pem)?, padding))
    }

    /// Binds a parsed public key.
    #[must_use]
    pub fn new(key: RsaPublicKey, padding: RsaPadding) -> Self {
        Self { key, padding }
    }

    /// Largest plaintext chunk one block carries.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.key.size().saturating_sub(self.padding.overhead())
    }

    /// Encrypts `plaintext` chunk by chunk and returns base64 ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let chunk_size = self.chunk_size();
        if chunk_size == 0 {
            return Err(CryptoError::InvalidKey("rsa key too small for padding".to_string()));
        }

        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(plaintext.len().div_ceil(chunk_size) * self.key.size());
        for chunk in plaintext.chunks(chunk_size) {
            let block = match self.padding {
                RsaPadding::Pkcs1v15 => self.key.encrypt(&mut rng, Pkcs1v15Encrypt, chunk),
                RsaPadding::OaepSha1 => self.key.encrypt(&mut rng, Oaep::new::<sha1::Sha1>(), chunk),
            }
            .map_err(|e| CryptoError::EncryptFailed(e.to_string()))?;
            out.extend_from_slice(&block);
        }
        Ok(STANDARD.encode(out))
    }
}

/// Chunked RSA decryption with a private key.
#[derive(Clone)]
pub struct RsaDecryptor {
    key: RsaPrivateKey,
    padding: RsaPadding,
}

impl fmt::Debug for RsaDecryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaDecryptor")
            .field("key_bits", &(self.key.size() * 8))
            .field("padding", &self.padding)
            .finish_non_exhaustive()
    }
}

impl RsaDecryptor {
    /// Binds a private key given as PEM.
    pub fn from_pem(pem: &str, padding: RsaPadding) -> Result<Self, CryptoError> {
        Ok(Self::new(parse_private_key(pem)?, padding))
    }

    /// Binds a parsed private key.
    #[must_use]
    pub fn new(key: RsaPrivateKey, padding: RsaPadding) -> Self {
        Self { key, padding }
    }

    /// Decrypts base64 ciphertext block by block.
    pub fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, CryptoError> {
        let raw = STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| CryptoError::MalformedInput(e.to_string()))?;
        let block = self.key.size();
        if raw.len() % block != 0 {
            return Err(CryptoError::MalformedInput(format!(
                "ciphertext length {} is not a multiple of the {block}-byte block",
                raw.len()
            )));
        }

        let mut out = Vec::with_capacity(raw.len());
        for chunk in raw.chunks(block) {
            let plain = match self.padding {
                RsaPadding::Pkcs1v15 => self.key.decrypt(Pkcs1v15Encrypt, chunk),
                RsaPadding::OaepSha1 => self.key.decrypt(Oaep::new::<sha1::Sha1>(), chunk),
            }
            .map_err(|e| CryptoError::DecryptFailed(e.to_string()))?;
            out.extend_from_slice(&plain);
        }
        Ok(out)
    }
}

/// RSA half of a [`Cipher`]; which half exists is fixed by the constructor.
#[derive(Debug, Clone)]
enum RsaKey {
    Encrypt(RsaEncryptor),
    Decrypt(RsaDecryptor),
}

/// A payload cipher bound to one direction of one exchange.
///
/// # Example
///
/// ```
/// use portcullis_crypto::{AesCbcCipher, Cipher};
///
/// let cipher = Cipher::from(AesCbcCipher::new(b"0123456789abcdef", b"fedcba9876543210").unwrap());
/// let sealed = cipher.encrypt(br#"{"name":"bob"}"#).unwrap();
/// assert_eq!(cipher.decrypt(&sealed).unwrap(), br#"{"name":"bob"}"#);
/// ```
#[derive(Debug, Clone)]
pub struct Cipher {
    algorithm: CipherAlgorithm,
    inner: CipherImpl,
}

#[derive(Debug, Clone)]
enum CipherImpl {
    Symmetric(AesCbcCipher),
    Asymmetric(RsaKey),
}

impl From<AesCbcCipher> for Cipher {
    fn from(cipher: AesCbcCipher) -> Self {
        Self {
            algorithm: CipherAlgorithm::Aes,
            inner: CipherImpl::Symmetric(cipher),
        }
    }
}

impl Cipher {
    /// Builds the cipher that decrypts requests: the shared AES key, or the
    /// server's private key.
    pub fn inbound(
        algorithm: CipherAlgorithm,
        material: &SecretMaterial,
        padding: RsaPadding,
    ) -> Result<Self, CryptoError> {
        let inner = match algorithm {
            CipherAlgorithm::Aes => CipherImpl::Symmetric(material.aes_cipher()?),
            CipherAlgorithm::Rsa => {
                let pem = material
                    .rsa
                    .server_private_key
                    .as_deref()
                    .ok_or(CryptoError::MissingKey(KeyKind::ServerPrivateKey))?;
                CipherImpl::Asymmetric(RsaKey::Decrypt(RsaDecryptor::from_pem(pem, padding)?))
            }
        };
        Ok(Self { algorithm, inner })
    }

    /// Builds the cipher that encrypts responses: the shared AES key, or the
    /// user's public key.
    pub fn outbound(
        algorithm: CipherAlgorithm,
        material: &SecretMaterial,
        padding: RsaPadding,
    ) -> Result<Self, CryptoError> {
        let inner = match algorithm {
            CipherAlgorithm::Aes => CipherImpl::Symmetric(material.aes_cipher()?),
            CipherAlgorithm::Rsa => {
                let pem = material
                    .rsa
                    .user_public_key
                    .as_deref()
                    .ok_or(CryptoError::MissingKey(KeyKind::UserPublicKey))?;
                CipherImpl::Asymmetric(RsaKey::Encrypt(RsaEncryptor::from_pem(pem, padding)?))
            }
        };
        Ok(Self { algorithm, inner })
    }

    /// Returns the algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    /// Encrypts `plaintext` to base64.
    ///
    /// # Errors
    ///
    /// [`CryptoError::WrongDirection`] on an inbound RSA cipher.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        match &self.inner {
            CipherImpl::Symmetric(aes) => aes.encrypt(plaintext),
            CipherImpl::Asymmetric(RsaKey::Encrypt(rsa)) => rsa.encrypt(plaintext),
            CipherImpl::Asymmetric(RsaKey::Decrypt(_)) => {
                Err(CryptoError::WrongDirection("rsa encryption"))
            }
        }
    }

    /// Decrypts base64 ciphertext.
    ///
    /// # Errors
    ///
    /// [`CryptoError::WrongDirection`] on an outbound RSA cipher.
    pub fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, CryptoError> {
        match &self.inner {
            CipherImpl::Symmetric(aes) => aes.decrypt(ciphertext),
            CipherImpl::Asymmetric(RsaKey::Decrypt(rsa)) => rsa.decrypt(ciphertext),
            CipherImpl::Asymmetric(RsaKey::Encrypt(_)) => {
                Err(CryptoError::WrongDirection("rsa decryption"))
            }
        }
    }
}
