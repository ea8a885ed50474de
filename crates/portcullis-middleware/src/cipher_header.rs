//! The cipher field selection header.
//!
//! The header is either the literal `cipher`, meaning the whole payload is
//! encrypted, or base64 of a JSON array of field names. A name prefixed with
//! `json:` holds a JSON document that is serialized before encryption and
//! parsed after decryption.
//!
//! ```text
//! x-cipher: cipher
//! x-cipher: WyJwYXNzd29yZCIsImpzb246cHJvZmlsZSJd     # ["password","json:profile"]
//! ```

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use portcullis_core::PortcullisError;

/// The literal header value selecting combined mode.
pub const COMBINED_TOKEN: &str = "cipher";

/// The field holding combined-mode ciphertext.
pub const CIPHERTEXT_FIELD: &str = "ciphertext";

const JSON_TAG: &str = "json:";

/// One field named by a split-mode header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelector {
    /// The field name, without its tag.
    pub name: String,
    /// Whether the value is a JSON document.
    pub json: bool,
}

impl FieldSelector {
    fn parse(raw: &str) -> Option<Self> {
        let (name, json) = match raw.strip_prefix(JSON_TAG) {
            Some(name) => (name, true),
            None => (raw, false),
        };
        let name = name.trim();
        (!name.is_empty()).then(|| Self {
            name: name.to_string(),
            json,
        })
    }
}

/// What the cipher header selects for encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CipherSelection {
    /// The whole payload.
    Combined,
    /// The listed fields.
    Fields(Vec<FieldSelector>),
}

impl CipherSelection {
    /// Parses the header value.
    ///
    /// # Errors
    ///
    /// A validation error if the value is neither `cipher` nor base64 of a
    /// JSON array of non-empty strings.
    pub fn parse(header: &str) -> Result<Self, PortcullisError> {
        let header = header.trim();
        if header.eq_ignore_ascii_case(COMBINED_TOKEN) {
            return Ok(Self::Combined);
        }

        let malformed = || PortcullisError::validation("malformed cipher header");
        let raw = STANDARD
            .decode(header)
            .or_else(|_| URL_SAFE.decode(header))
            .map_err(|_| malformed())?;
        let names: Vec<String> = serde_json::from_slice(&raw).map_err(|_| malformed())?;
        let selectors = names
            .iter()
            .map(|name| FieldSelector::parse(name))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(malformed)?;
        Ok(Self::Fields(selectors))
    }
}
