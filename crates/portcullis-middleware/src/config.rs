//! Pipeline configuration.
//!
//! These types are deserialized by `portcullis-config` and handed to the
//! stages once at startup; nothing here changes while requests run.

use portcullis_crypto::{
    CanonicalBuilder, CanonicalSuffix, CipherAlgorithm, DigestAlgorithm, KeyOrder, RsaPadding,
    SignatureAlgorithm, Strictness, DEFAULT_CREDENTIAL_FIELD,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Names of the headers the pipeline reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeaderNames {
    /// Base64-encoded application id.
    pub app_id: String,
    /// Crypto algorithm selector, echoed on the response.
    pub crypto: String,
    /// Signature algorithm selector, echoed on the response.
    pub signature: String,
    /// Cipher field selection: `cipher` or a base64 JSON list.
    pub cipher: String,
    /// Request ID, echoed on the response.
    pub request_id: String,
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self {
            app_id: "x-app-id".to_string(),
            crypto: "x-crypto-type".to_string(),
            signature: "x-sign-type".to_string(),
            cipher: "x-cipher".to_string(),
            request_id: "x-request-id".to_string(),
        }
    }
}

impl HeaderNames {
    /// Returns `(setting, header name)` pairs.
    #[must_use]
    pub fn entries(&self) -> [(&'static str, &str); 5] {
        [
            ("app_id", self.app_id.as_str()),
            ("crypto", self.crypto.as_str()),
            ("signature", self.signature.as_str()),
            ("cipher", self.cipher.as_str()),
            ("request_id", self.request_id.as_str()),
        ]
    }
}

/// Fields signed on the way in and out of one route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SigningRule {
    /// Request parameters covered by the inbound signature.
    #[serde(default)]
    pub request: Vec<String>,
    /// `data` fields covered by the outbound signature.
    #[serde(default)]
    pub response: Vec<String>,
}

impl SigningRule {
    /// Creates a rule.
    #[must_use]
    pub fn new<I, J, S, T>(request: I, response: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            request: request.into_iter().map(Into::into).collect(),
            response: response.into_iter().map(Into::into).collect(),
        }
    }
}

/// Signing rules keyed by operation id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SigningRules(HashMap<String, SigningRule>);

impl SigningRules {
    /// Creates an empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule for `operation_id`.
    #[must_use]
    pub fn with_rule(mut self, operation_id: impl Into<String>, rule: SigningRule) -> Self {
        self.0.insert(operation_id.into(), rule);
        self
    }

    /// Returns the rule of `operation_id`.
    #[must_use]
    pub fn get(&self, operation_id: &str) -> Option<&SigningRule> {
        self.0.get(operation_id)
    }

    /// Iterates over all rules.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SigningRule)> {
        self.0.iter()
    }

    /// Returns the number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Crypto stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CryptoStageConfig {
    /// Runtime toggle for the whole stage.
    pub enabled: bool,
    /// Algorithm used when the request names none.
    pub default_algorithm: CipherAlgorithm,
    /// RSA padding scheme.
    pub rsa_padding: RsaPadding,
}

impl Default for CryptoStageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_algorithm: CipherAlgorithm::Aes,
            rsa_padding: RsaPadding::Pkcs1v15,
        }
    }
}

/// How one direction builds its canonical string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CanonicalOptions {
    /// Key ordering.
    #[serde(default)]
    pub order: KeyOrder,
    /// Handling of absent and empty values.
    pub strictness: Strictness,
    /// Scheme-specific tail.
    #[serde(default)]
    pub suffix: CanonicalSuffix,
}

impl CanonicalOptions {
    /// Declared order, strict, no suffix.
    #[must_use]
    pub const fn request() -> Self {
        Self {
            order: KeyOrder::Declared,
            strictness: Strictness::Strict,
            suffix: CanonicalSuffix::None,
        }
    }

    /// Declared order, permissive, no suffix.
    #[must_use]
    pub const fn response() -> Self {
        Self {
            order: KeyOrder::Declared,
            strictness: Strictness::Permissive,
            suffix: CanonicalSuffix::None,
        }
    }

    /// Creates the canonical builder for these options.
    #[must_use]
    pub fn builder(&self, credential_field: &str) -> CanonicalBuilder {
        CanonicalBuilder::new(self.order, self.strictness)
            .with_suffix(self.suffix)
            .with_credential_field(credential_field)
    }
}

fn default_request_options() -> CanonicalOptions {
    CanonicalOptions::request()
}

fn default_response_options() -> CanonicalOptions {
    CanonicalOptions::response()
}

/// Signature stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignatureStageConfig {
    /// Runtime toggle for the whole stage.
    pub enabled: bool,
    /// Algorithm used when the request names none.
    pub default_algorithm: SignatureAlgorithm,
    /// Digest hashed before AES in the `aes` scheme.
    pub mac_digest: DigestAlgorithm,
    /// Parameter holding the app credential, never signed.
    pub credential_field: String,
    /// Canonical string of inbound signatures.
    #[serde(default = "default_request_options")]
    pub request: CanonicalOptions,
    /// Canonical string of outbound signatures.
    #[serde(default = "default_response_options")]
    pub response: CanonicalOptions,
}

impl Default for SignatureStageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_algorithm: SignatureAlgorithm::Md5,
            mac_digest: DigestAlgorithm::Sha256,
            credential_field: DEFAULT_CREDENTIAL_FIELD.to_string(),
            request: CanonicalOptions::request(),
            response: CanonicalOptions::response(),
        }
    }
}

/// Everything the standard pipeline needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Header names.
    pub headers: HeaderNames,
    /// Signing rules by operation id.
    pub rules: SigningRules,
    /// Crypto stage.
    pub crypto: CryptoStageConfig,
    /// Signature stage.
    pub signature: SignatureStageConfig,
}
