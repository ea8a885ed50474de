//! Per-application key material and its cache-first resolver.
//!
//! Material is cached as one hash per application:
//!
//! ```text
//! secret:<appId>  aes_key  aes_iv  user_public_key  server_public_key
//!                 server_private_key  status
//! ```
//!
//! The resolver only reads and fills the cache. Edits happen elsewhere and
//! call [`SecretResolver::invalidate`].

use crate::cipher::AesCbcCipher;
use crate::error::{CryptoError, SecretError};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use parking_lot::RwLock;
use portcullis_cache::CacheStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

const FIELD_AES_KEY: &str = "aes_key";
const FIELD_AES_IV: &str = "aes_iv";
const FIELD_USER_PUBLIC_KEY: &str = "user_public_key";
const FIELD_SERVER_PUBLIC_KEY: &str = "server_public_key";
const FIELD_SERVER_PRIVATE_KEY: &str = "server_private_key";
const FIELD_STATUS: &str = "status";

/// Longest accepted application id.
const MAX_APP_ID_LEN: usize = 64;

/// A kind of key an operation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// The shared AES key and IV.
    AesKey,
    /// The user's RSA public key.
    UserPublicKey,
    /// The server's RSA public key.
    ServerPublicKey,
    /// The server's RSA private key.
    ServerPrivateKey,
}

impl KeyKind {
    /// Returns the name used in errors and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AesKey => "aes key",
            Self::UserPublicKey => "user public key",
            Self::ServerPublicKey => "server public key",
            Self::ServerPrivateKey => "server private key",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an application's material may be used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretStatus {
    /// Usable.
    #[default]
    Active,
    /// Revoked by an administrator.
    Revoked,
}

impl SecretStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }

    fn parse(text: &str) -> Self {
        match text.trim().to_ascii_lowercase().as_str() {
            "revoked" | "0" | "disabled" => Self::Revoked,
            _ => Self::Active,
        }
    }
}

/// Shared AES key and IV, as the raw key text.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AesMaterial {
    /// Key text; its bytes are the key.
    pub key: String,
    /// IV text; its bytes are the IV.
    pub iv: String,
}

impl AesMaterial {
    /// Creates AES material.
    #[must_use]
    pub fn new(key: impl Into<String>, iv: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            iv: iv.into(),
        }
    }
}

impl fmt::Debug for AesMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesMaterial { .. }")
    }
}

/// RSA keys as PEM (or bare base64) text.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaMaterial {
    /// The user's public key; encrypts responses and verifies requests.
    pub user_public_key: Option<String>,
    /// The server's public key, handed to the user.
    pub server_public_key: Option<String>,
    /// The server's private key; decrypts requests and signs responses.
    pub server_private_key: Option<String>,
}

impl fmt::Debug for RsaMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaMaterial")
            .field("user_public_key", &self.user_public_key.is_some())
            .field("server_public_key", &self.server_public_key.is_some())
            .field("server_private_key", &self.server_private_key.is_some())
            .finish()
    }
}

/// Key material bound to one application id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMaterial {
    /// The application id.
    pub app_id: String,
    /// AES key and IV, if issued.
    pub aes: Option<AesMaterial>,
    /// RSA keys.
    #[serde(default)]
    pub rsa: RsaMaterial,
    /// Active or revoked.
    #[serde(default)]
    pub status: SecretStatus,
}

impl SecretMaterial {
    /// Creates active material with no keys.
    #[must_use]
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            aes: None,
            rsa: RsaMaterial::default(),
            status: SecretStatus::Active,
        }
    }

    /// Sets the AES key and IV.
    #[must_use]
    pub fn with_aes(mut self, key: impl Into<String>, iv: impl Into<String>) -> Self {
        self.aes = Some(AesMaterial::new(key, iv));
        self
    }

    /// Sets the RSA keys.
    #[must_use]
    pub fn with_rsa(mut self, rsa: RsaMaterial) -> Self {
        self.rsa = rsa;
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: SecretStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns true if the material carries `kind`.
    #[must_use]
    pub fn has(&self, kind: KeyKind) -> bool {
        let present = |key: &Option<String>| key.as_deref().is_some_and(|k| !k.trim().is_empty());
        match kind {
            KeyKind::AesKey => self
                .aes
                .as_ref()
                .is_some_and(|aes| !aes.key.is_empty() && !aes.iv.is_empty()),
            KeyKind::UserPublicKey => present(&self.rsa.user_public_key),
            KeyKind::ServerPublicKey => present(&self.rsa.server_public_key),
            KeyKind::ServerPrivateKey => present(&self.rsa.server_private_key),
        }
    }

    /// Builds the AES cipher from this material.
    pub fn aes_cipher(&self) -> Result<AesCbcCipher, CryptoError> {
        let aes = self
            .aes
            .as_ref()
            .filter(|_| self.has(KeyKind::AesKey))
            .ok_or(CryptoError::MissingKey(KeyKind::AesKey))?;
        AesCbcCipher::new(aes.key.as_bytes(), aes.iv.as_bytes())
    }

    fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![(FIELD_STATUS.to_string(), self.status.as_str().to_string())];
        if let Some(aes) = &self.aes {
            fields.push((FIELD_AES_KEY.to_string(), aes.key.clone()));
            fields.push((FIELD_AES_IV.to_string(), aes.iv.clone()));
        }
        let rsa = [
            (FIELD_USER_PUBLIC_KEY, &self.rsa.user_public_key),
            (FIELD_SERVER_PUBLIC_KEY, &self.rsa.server_public_key),
            (FIELD_SERVER_PRIVATE_KEY, &self.rsa.server_private_key),
        ];
        for (name, value) in rsa {
            if let Some(value) = value {
                fields.push((name.to_string(), value.clone()));
            }
        }
        fields
    }

    fn from_fields(app_id: &str, mut fields: HashMap<String, String>) -> Self {
        let aes = match (fields.remove(FIELD_AES_KEY), fields.remove(FIELD_AES_IV)) {
            (Some(key), Some(iv)) => Some(AesMaterial { key, iv }),
            _ => None,
        };
        Self {
            app_id: app_id.to_string(),
            aes,
            rsa: RsaMaterial {
                user_public_key: fields.remove(FIELD_USER_PUBLIC_KEY),
                server_public_key: fields.remove(FIELD_SERVER_PUBLIC_KEY),
                server_private_key: fields.remove(FIELD_SERVER_PRIVATE_KEY),
            },
            status: fields
                .get(FIELD_STATUS)
                .map_or(SecretStatus::Active, |status| SecretStatus::parse(status)),
        }
    }
}

/// Decodes the base64 application id header.
///
/// Standard and URL-safe alphabets are accepted, with or without padding.
/// The decoded id must be 1 to 64 characters of `[A-Za-z0-9_.-]`.
///
/// # Example
///
/// ```
/// use portcullis_crypto::decode_app_id;
///
/// assert_eq!(decode_app_id("WDE=").unwrap(), "X1");
/// assert!(decode_app_id("not base64!").is_err());
/// ```
pub fn decode_app_id(encoded: &str) -> Result<String, SecretError> {
    let encoded = encoded.trim();
    let padded = match encoded.len() % 4 {
        2 => format!("{encoded}=="),
        3 => format!("{encoded}="),
        _ => encoded.to_string(),
    };
    let raw = STANDARD
        .decode(&padded)
        .or_else(|_| URL_SAFE.decode(&padded))
        .map_err(|_| SecretError::InvalidAppId("application id is not base64".to_string()))?;
    let app_id = String::from_utf8(raw)
        .map_err(|_| SecretError::InvalidAppId("application id is not UTF-8".to_string()))?;

    let valid = !app_id.is_empty()
        && app_id.len() <= MAX_APP_ID_LEN
        && app_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));
    if !valid {
        return Err(SecretError::InvalidAppId(
            "application id has invalid characters".to_string(),
        ));
    }
    Ok(app_id)
}

/// The source of truth for key material.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Loads the material for `app_id`, or `None` if the id is unknown.
    async fn find(&self, app_id: &str) -> Result<Option<SecretMaterial>, SecretError>;
}

/// An in-memory [`SecretSource`] for development and tests.
#[derive(Debug, Default)]
pub struct StaticSecretSource {
    materials: RwLock<HashMap<String, SecretMaterial>>,
}

impl StaticSecretSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds material, keyed by its app id.
    #[must_use]
    pub fn with_material(self, material: SecretMaterial) -> Self {
        self.insert(material);
        self
    }

    /// Inserts or replaces material.
    pub fn insert(&self, material: SecretMaterial) {
        self.materials
            .write()
            .insert(material.app_id.clone(), material);
    }

    /// Removes material.
    pub fn remove(&self, app_id: &str) -> Option<SecretMaterial> {
        self.materials.write().remove(app_id)
    }
}

#[async_trait]
impl SecretSource for StaticSecretSource {
    async fn find(&self, app_id: &str) -> Result<Option<SecretMaterial>, SecretError> {
        Ok(self.materials.read().get(app_id).cloned())
    }
}

/// Secret resolver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretConfig {
    /// Cache key prefix.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Expiry of cached material in seconds; 0 keeps it until invalidated.
    #[serde(default)]
    pub ttl_secs: u64,
}

fn default_key_prefix() -> String {
    "secret:".to_string()
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            ttl_secs: 0,
        }
    }
}

/// Cache-first resolver of per-application key material.
///
/// # Example
///
/// ```rust,ignore
/// let resolver = SecretResolver::new(store, Arc::new(source), SecretConfig::default());
/// let material = resolver.resolve("X1", &[KeyKind::AesKey]).await?;
/// ```
#[derive(Clone)]
pub struct SecretResolver {
    store: Arc<dyn CacheStore>,
    source: Arc<dyn SecretSource>,
    config: SecretConfig,
}

impl fmt::Debug for SecretResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SecretResolver {
    /// Creates a resolver over a cache store and a source of truth.
    #[must_use]
    pub fn new(
        store: Arc<dyn CacheStore>,
        source: Arc<dyn SecretSource>,
        config: SecretConfig,
    ) -> Self {
        Self {
            store,
            source,
            config,
        }
    }

    fn cache_key(&self, app_id: &str) -> String {
        format!("{}{app_id}", self.config.key_prefix)
    }

    /// Resolves the material of `app_id` and checks it carries `kinds`.
    ///
    /// # Errors
    ///
    /// - [`SecretError::UnknownApp`] if neither cache nor source know the id
    /// - [`SecretError::Revoked`] if the material is revoked
    /// - [`SecretError::MissingKey`] for the first absent kind
    pub async fn resolve(
        &self,
        app_id: &str,
        kinds: &[KeyKind],
    ) -> Result<SecretMaterial, SecretError> {
        let key = self.cache_key(app_id);
        let cached = self.store.hgetall(&key).await?;

        let material = if cached.is_empty() {
            let Some(material) = self.source.find(app_id).await? else {
                return Err(SecretError::UnknownApp(app_id.to_string()));
            };
            self.store.hset_multiple(&key, &material.to_fields()).await?;
            if self.config.ttl_secs > 0 {
                self.store.expire(&key, self.config.ttl_secs).await?;
            }
            info!(app_id, "secret material cached from source");
            material
        } else {
            debug!(app_id, "secret material served from cache");
            SecretMaterial::from_fields(app_id, cached)
        };

        if material.status == SecretStatus::Revoked {
            return Err(SecretError::Revoked(app_id.to_string()));
        }
        if let Some(kind) = kinds.iter().copied().find(|kind| !material.has(*kind)) {
            return Err(SecretError::MissingKey {
                app_id: app_id.to_string(),
                kind,
            });
        }
        Ok(material)
    }

    /// Drops the cached material of `app_id`.
    pub async fn invalidate(&self, app_id: &str) -> Result<(), SecretError> {
        self.store.delete(&[self.cache_key(app_id)]).await?;
        info!(app_id, "secret material invalidated");
        Ok(())
    }
}
