//! The declarative cache registry.
//!
//! Each entry maps an index name to the key it materializes, the cache shape,
//! the data source that produces it and an expiry:
//!
//! ```toml
//! delimiter = ":"
//!
//! [entries.role_status]
//! key = "role_status"
//! shape = "hash"
//! source = "role"
//! method = "status_map"
//!
//! [entries.role_menu]
//! key = "role_menu:"      # trailing delimiter: one key per source row
//! shape = "set"
//! source = "role"
//! method = "menu_ids"
//! expire = 3600
//! ```
//!
//! The registry is read-only once loaded. Entries are validated lazily so a
//! broken entry only disables itself.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Default separator between an index and its sub-keys.
pub const DEFAULT_DELIMITER: &str = ":";

/// Default upper bound of the random extra expiry, in seconds (24h).
pub const DEFAULT_JITTER_SECS: u64 = 86_400;

/// The cache structure an entry is loaded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheShape {
    /// A single string value.
    String,
    /// A hash of field to value.
    Hash,
    /// A list, in source order.
    List,
    /// An unordered set of members.
    Set,
    /// A set of members ordered by score.
    #[serde(alias = "zset")]
    SortedSet,
}

impl CacheShape {
    /// Returns the shape name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Hash => "hash",
            Self::List => "list",
            Self::Set => "set",
            Self::SortedSet => "sorted_set",
        }
    }
}

/// One registry row.
///
/// Every field is optional at parse time; an incomplete entry is reported
/// by [`CacheEntry::check`] and skipped by the rebuild engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheEntry {
    /// Cache key; a trailing delimiter fans the output out into sub-keys.
    #[serde(default)]
    pub key: String,

    /// Cache shape.
    #[serde(default, alias = "type")]
    pub shape: Option<CacheShape>,

    /// Name of the registered data source.
    #[serde(default, alias = "class")]
    pub source: String,

    /// Method passed to the data source.
    #[serde(default)]
    pub method: String,

    /// Base expiry in seconds; 0 keeps keys forever.
    #[serde(default)]
    pub expire: u64,
}

impl CacheEntry {
    /// Creates a complete entry.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        shape: CacheShape,
        source: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            shape: Some(shape),
            source: source.into(),
            method: method.into(),
            expire: 0,
        }
    }

    /// Sets the base expiry.
    #[must_use]
    pub fn with_expire(mut self, seconds: u64) -> Self {
        self.expire = seconds;
        self
    }

    /// Returns true if the key ends with the delimiter.
    #[must_use]
    pub fn fans_out(&self, delimiter: &str) -> bool {
        !delimiter.is_empty() && self.key.ends_with(delimiter)
    }

    /// Checks the entry registered under `index`.
    ///
    /// Returns the reason the entry is unusable, if any.
    pub fn check(&self, index: &str, delimiter: &str) -> Result<CacheShape, String> {
        if self.key.is_empty() {
            return Err("missing key".to_string());
        }
        let Some(shape) = self.shape else {
            return Err("missing shape".to_string());
        };
        if self.source.is_empty() {
            return Err("missing source".to_string());
        }
        if self.method.is_empty() {
            return Err("missing method".to_string());
        }

        let prefix = if delimiter.is_empty() {
            self.key.as_str()
        } else {
            self.key.split(delimiter).next().unwrap_or_default()
        };
        if prefix != index {
            return Err(format!(
                "key prefix '{prefix}' does not match index '{index}'"
            ));
        }

        Ok(shape)
    }
}

/// The full registry: delimiter, jitter bound and entries by index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheRegistry {
    /// Separator between index and sub-keys.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// Upper bound of the random extra expiry, in seconds.
    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,

    /// Entries by index name, in declaration order.
    #[serde(default)]
    pub entries: IndexMap<String, CacheEntry>,
}

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.to_string()
}

const fn default_jitter_secs() -> u64 {
    DEFAULT_JITTER_SECS
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            jitter_secs: DEFAULT_JITTER_SECS,
            entries: IndexMap::new(),
        }
    }
}

impl CacheRegistry {
    /// Creates an empty registry with the default delimiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry under `index`.
    #[must_use]
    pub fn with_entry(mut self, index: impl Into<String>, entry: CacheEntry) -> Self {
        self.entries.insert(index.into(), entry);
        self
    }

    /// Sets the jitter bound.
    #[must_use]
    pub fn with_jitter_secs(mut self, seconds: u64) -> Self {
        self.jitter_secs = seconds;
        self
    }

    /// Returns the entry registered under `index`.
    #[must_use]
    pub fn get(&self, index: &str) -> Option<&CacheEntry> {
        self.entries.get(index)
    }

    /// Returns `(index, reason)` for every entry that would be skipped.
    #[must_use]
    pub fn problems(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter_map(|(index, entry)| {
                entry
                    .check(index, &self.delimiter)
                    .err()
                    .map(|reason| (index.clone(), reason))
            })
            .collect()
    }
}
