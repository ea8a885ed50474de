//! Canonical strings for signing.
//!
//! A canonical string is the exact byte input of a signature:
//!
//! ```text
//! name=bob&password=pw&secureCode=123456[&<suffix>]
//! ```
//!
//! The same builder configuration must be used to sign and to verify a given
//! rule. Two key orders exist side by side: the rule's declared order and the
//! ascending order of every key in the map. Neither is a default for the
//! other; each call site picks one.

use crate::error::CanonicalError;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The parameter carrying the signature itself.
pub const SIGN_FIELD: &str = "sign";

/// The parameter carrying the application credential.
pub const DEFAULT_CREDENTIAL_FIELD: &str = "key";

/// Order in which keys enter the canonical string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrder {
    /// The order of the rule's field list.
    #[default]
    Declared,
    /// Every key of the map, ascending by byte order.
    Ascending,
}

/// How absent, null and empty values are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// Declared fields must be present and non-null; empty strings are kept
    /// as `key=`.
    Strict,
    /// Absent, null and empty-string values are skipped.
    #[default]
    Permissive,
}

/// The scheme-specific tail appended after the parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalSuffix {
    /// Nothing is appended.
    #[default]
    None,
    /// `requestId=<request id>&key=<app id>`.
    RequestIdAndKey,
    /// `key=<md5 hex of "<app id>-<request id>">`.
    HashedKey,
}

/// Per-exchange values the suffix is built from.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuffixContext<'a> {
    /// The application id.
    pub app_id: &'a str,
    /// The request id.
    pub request_id: &'a str,
}

impl CanonicalSuffix {
    fn render(self, ctx: &SuffixContext<'_>) -> Option<String> {
        match self {
            Self::None => None,
            Self::RequestIdAndKey => Some(format!(
                "requestId={}&key={}",
                ctx.request_id, ctx.app_id
            )),
            Self::HashedKey => {
                let digest = Md5::digest(format!("{}-{}", ctx.app_id, ctx.request_id));
                Some(format!("key={}", hex::encode(digest)))
            }
        }
    }
}

/// Renders a parameter value: strings verbatim, booleans and numbers as
/// their JSON text, arrays and objects as compact JSON.
#[must_use]
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Builds canonical strings from a parameter map.
///
/// # Example
///
/// ```
/// use portcullis_crypto::{CanonicalBuilder, KeyOrder, Strictness, SuffixContext};
/// use serde_json::json;
///
/// let builder = CanonicalBuilder::new(KeyOrder::Declared, Strictness::Strict);
/// let params = json!({"name": "bob", "password": "pw", "sign": "ignored"});
/// let fields = vec!["name".to_string(), "password".to_string()];
///
/// let canonical = builder
///     .build(params.as_object().unwrap(), &fields, &SuffixContext::default())
///     .unwrap();
/// assert_eq!(canonical, "name=bob&password=pw");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalBuilder {
    order: KeyOrder,
    strictness: Strictness,
    suffix: CanonicalSuffix,
    credential_field: String,
}

impl CanonicalBuilder {
    /// Creates a builder with no suffix and the default credential field.
    #[must_use]
    pub fn new(order: KeyOrder, strictness: Strictness) -> Self {
        Self {
            order,
            strictness,
            suffix: CanonicalSuffix::None,
            credential_field: DEFAULT_CREDENTIAL_FIELD.to_string(),
        }
    }

    /// Sets the suffix strategy.
    #[must_use]
    pub fn with_suffix(mut self, suffix: CanonicalSuffix) -> Self {
        self.suffix = suffix;
        self
    }

    /// Sets the name of the credential parameter that is never signed.
    #[must_use]
    pub fn with_credential_field(mut self, field: impl Into<String>) -> Self {
        self.credential_field = field.into();
        self
    }

    /// Returns the key order.
    #[must_use]
    pub const fn order(&self) -> KeyOrder {
        self.order
    }

    /// Returns the strictness.
    #[must_use]
    pub const fn strictness(&self) -> Strictness {
        self.strictness
    }

    fn is_excluded(&self, key: &str) -> bool {
        key == SIGN_FIELD || key == self.credential_field
    }

    /// Builds the canonical string for `fields` over `params`.
    ///
    /// # Errors
    ///
    /// In strict mode, returns [`CanonicalError::MissingParameter`] for the
    /// first declared field that is absent or null.
    pub fn build(
        &self,
        params: &Map<String, Value>,
        fields: &[String],
        suffix: &SuffixContext<'_>,
    ) -> Result<String, CanonicalError> {
        if self.strictness == Strictness::Strict {
            for field in fields.iter().filter(|field| !self.is_excluded(field)) {
                if params.get(field).map_or(true, Value::is_null) {
                    return Err(CanonicalError::MissingParameter(field.clone()));
                }
            }
        }

        let keys: Vec<&str> = match self.order {
            KeyOrder::Declared => fields.iter().map(String::as_str).collect(),
            KeyOrder::Ascending => {
                let mut keys: Vec<&str> = params.keys().map(String::as_str).collect();
                keys.sort_unstable();
                keys
            }
        };

        let mut pairs = Vec::with_capacity(keys.len());
        for key in keys {
            if self.is_excluded(key) {
                continue;
            }
            let Some(value) = params.get(key) else {
                continue;
            };
            match value {
                Value::Null => continue,
                Value::String(text) if text.is_empty() && self.strictness == Strictness::Permissive => {
                    continue
                }
                _ => {}
            }
            pairs.push(format!("{key}={}", render_value(value)));
        }

        let mut canonical = pairs.join("&");
        if let Some(tail) = self.suffix.render(suffix) {
            if !canonical.is_empty() {
                canonical.push('&');
            }
            canonical.push_str(&tail);
        }
        Ok(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| (*name).to_string()).collect()
    }

    #[test]
    fn test_declared_order_follows_rule() {
        let builder = CanonicalBuilder::new(KeyOrder::Declared, Strictness::Strict);
        let params = map(json!({"a": "1", "b": "2", "c": "3"}));
        let canonical = builder
            .build(&params, &fields(&["c", "a"]), &SuffixContext::default())
            .unwrap();
        assert_eq!(canonical, "c=3&a=1");
    }

    #[test]
    fn test_ascending_order_uses_every_key() {
        let builder = CanonicalBuilder::new(KeyOrder::Ascending, Strictness::Permissive);
        let params = map(json!({"b": "2", "a": "1", "C": "0", "sign": "x", "key": "k"}));
        let canonical = builder.build(&params, &[], &SuffixContext::default()).unwrap();
        assert_eq!(canonical, "C=0&a=1&b=2");
    }

    #[test]
    fn test_strict_rejects_absent_and_null() {
        let builder = CanonicalBuilder::new(KeyOrder::Declared, Strictness::Strict);

        let absent = map(json!({"name": "bob"}));
        assert_eq!(
            builder.build(&absent, &fields(&["name", "password"]), &SuffixContext::default()),
            Err(CanonicalError::MissingParameter("password".into()))
        );

        let null = map(json!({"name": "bob", "password": null}));
        assert_eq!(
            builder.build(&null, &fields(&["name", "password"]), &SuffixContext::default()),
            Err(CanonicalError::MissingParameter("password".into()))
        );
    }

    #[test]
    fn test_strict_keeps_present_empty_values() {
        let builder = CanonicalBuilder::new(KeyOrder::Declared, Strictness::Strict);
        let params = map(json!({"name": "bob", "nick": ""}));
        let canonical = builder
            .build(&params, &fields(&["name", "nick"]), &SuffixContext::default())
            .unwrap();
        assert_eq!(canonical, "name=bob&nick=");
    }

    #[test]
    fn test_permissive_skips_absent_null_and_empty() {
        let builder = CanonicalBuilder::new(KeyOrder::Declared, Strictness::Permissive);
        let params = map(json!({"a": "1", "b": "", "c": null}));
        let canonical = builder
            .build(&params, &fields(&["a", "b", "c", "d"]), &SuffixContext::default())
            .unwrap();
        assert_eq!(canonical, "a=1");
    }

    #[test]
    fn test_sign_and_credential_are_never_included() {
        let builder = CanonicalBuilder::new(KeyOrder::Declared, Strictness::Strict)
            .with_credential_field("appKey");
        let params = map(json!({"a": "1", "sign": "s", "appKey": "secret"}));
        let canonical = builder
            .build(&params, &fields(&["a", "sign", "appKey"]), &SuffixContext::default())
            .unwrap();
        assert_eq!(canonical, "a=1");
    }

    #[test]
    fn test_value_rendering() {
        assert_eq!(render_value(&json!("text")), "text");
        assert_eq!(render_value(&json!(42)), "42");
        assert_eq!(render_value(&json!(1.5)), "1.5");
        assert_eq!(render_value(&json!(true)), "true");
        assert_eq!(render_value(&json!([1, "a"])), r#"[1,"a"]"#);
        assert_eq!(render_value(&json!({"k": 1})), r#"{"k":1}"#);
    }

    #[test]
    fn test_suffixes() {
        let params = map(json!({"a": "1"}));
        let ctx = SuffixContext {
            app_id: "X1",
            request_id: "req-1",
        };

        let with_ids = CanonicalBuilder::new(KeyOrder::Declared, Strictness::Strict)
            .with_suffix(CanonicalSuffix::RequestIdAndKey)
            .build(&params, &fields(&["a"]), &ctx)
            .unwrap();
        assert_eq!(with_ids, "a=1&requestId=req-1&key=X1");

        let hashed = CanonicalBuilder::new(KeyOrder::Declared, Strictness::Strict)
            .with_suffix(CanonicalSuffix::HashedKey)
            .build(&params, &fields(&["a"]), &ctx)
            .unwrap();
        let expected = hex::encode(Md5::digest(b"X1-req-1"));
        assert_eq!(hashed, format!("a=1&key={expected}"));

        let suffix_only = CanonicalBuilder::new(KeyOrder::Declared, Strictness::Permissive)
            .with_suffix(CanonicalSuffix::RequestIdAndKey)
            .build(&Map::new(), &[], &ctx)
            .unwrap();
        assert_eq!(suffix_only, "requestId=req-1&key=X1");
    }

    proptest! {
        #[test]
        fn prop_ascending_ignores_insertion_order(
            entries in proptest::collection::vec(("[a-z]{1,6}", "[ -~]{0,12}"), 0..12)
        ) {
            let builder = CanonicalBuilder::new(KeyOrder::Ascending, Strictness::Permissive);

            let forward: Map<String, Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            let mut reversed = Map::new();
            for (k, v) in forward.iter().rev() {
                reversed.insert(k.clone(), v.clone());
            }

            let ctx = SuffixContext::default();
            let a = builder.build(&forward, &[], &ctx).unwrap();
            let b = builder.build(&reversed, &[], &ctx).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a, builder.build(&forward, &[], &ctx).unwrap());
        }

        #[test]
        fn prop_declared_is_deterministic(
            values in proptest::collection::btree_map("[a-z]{1,6}", "[ -~]{1,12}", 1..8)
        ) {
            let builder = CanonicalBuilder::new(KeyOrder::Declared, Strictness::Strict);
            let params: Map<String, Value> = values
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            let declared: Vec<String> = values
                .keys()
                .filter(|k| k.as_str() != SIGN_FIELD && k.as_str() != DEFAULT_CREDENTIAL_FIELD)
                .cloned()
                .collect();

            let ctx = SuffixContext { app_id: "app", request_id: "rid" };
            let first = builder.build(&params, &declared, &ctx).unwrap();
            let second = builder.build(&params, &declared, &ctx).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
