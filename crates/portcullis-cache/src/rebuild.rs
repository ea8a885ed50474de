//! The cache rebuild engine.

use crate::error::CacheError;
use crate::registry::{CacheEntry, CacheRegistry, CacheShape};
use crate::source::SourceRegistry;
use crate::store::CacheStore;
use indexmap::IndexMap;
use portcullis_telemetry::metrics::record_cache_rebuild;
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Key pattern selecting every registered index.
const ALL_INDEXES: &str = "*";

/// What happened to one registry entry during a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// The source output was loaded into `keys` cache keys.
    Loaded {
        /// Number of cache keys written.
        keys: usize,
    },
    /// The entry was not loaded.
    Skipped {
        /// Why the entry was skipped.
        reason: String,
    },
}

/// Per-index results of a rebuild pass, in registry order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    outcomes: IndexMap<String, EntryOutcome>,
}

impl RebuildReport {
    /// Returns the outcome for `index`.
    #[must_use]
    pub fn outcome(&self, index: &str) -> Option<&EntryOutcome> {
        self.outcomes.get(index)
    }

    /// Iterates over `(index, outcome)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EntryOutcome)> {
        self.outcomes.iter().map(|(index, outcome)| (index.as_str(), outcome))
    }

    /// Returns true if `index` was loaded.
    #[must_use]
    pub fn is_loaded(&self, index: &str) -> bool {
        matches!(self.outcomes.get(index), Some(EntryOutcome::Loaded { .. }))
    }

    /// Returns the total number of keys written.
    #[must_use]
    pub fn keys_written(&self) -> usize {
        self.outcomes
            .values()
            .map(|outcome| match outcome {
                EntryOutcome::Loaded { keys } => *keys,
                EntryOutcome::Skipped { .. } => 0,
            })
            .sum()
    }

    /// Returns the number of entries in the report.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns true if no entry was processed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    fn skip(&mut self, index: &str, reason: String) {
        warn!(index, reason = %reason, "skipping cache entry");
        record_cache_rebuild(index, "skipped", 0);
        self.outcomes
            .insert(index.to_string(), EntryOutcome::Skipped { reason });
    }

    fn loaded(&mut self, index: &str, keys: usize) {
        record_cache_rebuild(index, "loaded", keys as u64);
        self.outcomes
            .insert(index.to_string(), EntryOutcome::Loaded { keys });
    }
}

/// Rebuilds cache keys from their registered data sources.
///
/// A rebuild resolves the key pattern to registry entries, deletes the keys
/// they own, asks each entry's source for fresh content and loads it into the
/// declared shape. Deletion and reload are not atomic: concurrent readers can
/// see a key missing or partially loaded while a rebuild runs.
///
/// # Example
///
/// ```rust,ignore
/// let rebuilder = CacheRebuilder::new(store, Arc::new(registry), Arc::new(sources));
///
/// // Everything owned by the `role_menu` index.
/// rebuilder.rebuild("role_menu", &[]).await?;
///
/// // Only sub-keys 3 and 7, leaving the rest of `role_menu:*` untouched.
/// rebuilder.rebuild("role_menu:", &["3".into(), "7".into()]).await?;
/// ```
#[derive(Clone)]
pub struct CacheRebuilder {
    store: Arc<dyn CacheStore>,
    registry: Arc<CacheRegistry>,
    sources: Arc<SourceRegistry>,
}

impl std::fmt::Debug for CacheRebuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRebuilder")
            .field("indexes", &self.registry.entries.keys().collect::<Vec<_>>())
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

impl CacheRebuilder {
    /// Creates a rebuilder over a store, a registry and its data sources.
    #[must_use]
    pub fn new(
        store: Arc<dyn CacheStore>,
        registry: Arc<CacheRegistry>,
        sources: Arc<SourceRegistry>,
    ) -> Self {
        Self {
            store,
            registry,
            sources,
        }
    }

    /// Returns the registry this rebuilder reads.
    #[must_use]
    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    /// Rebuilds the keys selected by `key_pattern`.
    ///
    /// `key_pattern` is `*` for every index, a bare index name, or an index
    /// followed by the delimiter and optional key segments. Existing keys are
    /// deleted first unless the pattern carries a delimiter and `sub_keys`
    /// restricts the refresh.
    ///
    /// # Errors
    ///
    /// - [`CacheError::UnknownCacheIndex`] if the index is not registered;
    ///   nothing is touched.
    /// - [`CacheError::SourceFailed`] if a source fails; the pass stops and
    ///   entries loaded before it stay loaded.
    /// - [`CacheError::Store`] if the store rejects a delete or write.
    pub async fn rebuild(
        &self,
        key_pattern: &str,
        sub_keys: &[String],
    ) -> Result<RebuildReport, CacheError> {
        let delimiter = self.registry.delimiter.as_str();
        let (index, segments) = split_pattern(key_pattern, delimiter);

        let targets: Vec<(&String, &CacheEntry)> = if index == ALL_INDEXES {
            self.registry.entries.iter().collect()
        } else {
            let (name, entry) = self
                .registry
                .entries
                .get_key_value(index)
                .ok_or_else(|| CacheError::UnknownCacheIndex(index.to_string()))?;
            vec![(name, entry)]
        };

        let bare = delimiter.is_empty() || !key_pattern.contains(delimiter);
        let invalidate = bare || sub_keys.is_empty();

        info!(
            pattern = key_pattern,
            entries = targets.len(),
            sub_keys = sub_keys.len(),
            invalidate,
            "rebuilding cache"
        );

        let mut report = RebuildReport::default();
        for (name, entry) in targets {
            let shape = match entry.check(name, delimiter) {
                Ok(shape) => shape,
                Err(reason) => {
                    report.skip(name, reason);
                    continue;
                }
            };
            let Some(source) = self.sources.get(&entry.source) else {
                report.skip(name, format!("source '{}' is not registered", entry.source));
                continue;
            };

            if invalidate {
                self.invalidate(name, delimiter).await?;
            }

            let output = match source.fetch(&entry.method, &segments, sub_keys).await {
                Ok(output) => output,
                Err(source_error) => {
                    error!(
                        index = %name,
                        method = %entry.method,
                        segments = ?segments,
                        sub_keys = ?sub_keys,
                        error = %source_error,
                        "cache source failed; aborting rebuild"
                    );
                    record_cache_rebuild(name, "failed", 0);
                    return Err(CacheError::SourceFailed {
                        index: name.clone(),
                        segments,
                        sub_keys: sub_keys.to_vec(),
                        source: source_error,
                    });
                }
            };

            match output {
                Some(value @ (Value::Object(_) | Value::Array(_))) => {
                    let keys = self.load(entry, shape, value).await?;
                    debug!(index = %name, keys, shape = shape.as_str(), "cache entry loaded");
                    report.loaded(name, keys);
                }
                Some(other) => {
                    report.skip(name, format!("source returned a non-collection value: {other}"));
                }
                None => report.skip(name, "source returned no data".to_string()),
            }
        }

        Ok(report)
    }

    /// Deletes the index key and every `index<delimiter>*` key.
    async fn invalidate(&self, index: &str, delimiter: &str) -> Result<(), CacheError> {
        let mut removed = self.store.delete(&[index.to_string()]).await?;
        if !delimiter.is_empty() {
            let pattern = format!("{}{delimiter}*", escape_glob(index));
            removed += self.store.delete_matching(&pattern).await?;
        }
        debug!(index, removed, "invalidated cache index");
        Ok(())
    }

    /// Writes `value` into the store, returning the number of keys written.
    async fn load(
        &self,
        entry: &CacheEntry,
        shape: CacheShape,
        value: Value,
    ) -> Result<usize, CacheError> {
        let fan_out = entry.fans_out(&self.registry.delimiter);
        let targets: Vec<(String, Value)> = if fan_out {
            match value {
                Value::Object(map) => map
                    .into_iter()
                    .map(|(sub_key, value)| (format!("{}{sub_key}", entry.key), value))
                    .collect(),
                Value::Array(items) => items
                    .into_iter()
                    .enumerate()
                    .map(|(position, value)| (format!("{}{position}", entry.key), value))
                    .collect(),
                _ => Vec::new(),
            }
        } else {
            vec![(entry.key.clone(), value)]
        };

        let mut written = 0usize;
        for (key, value) in targets {
            self.store.delete(&[key.clone()]).await?;

            let stored = match shape {
                CacheShape::String => {
                    let text = if fan_out {
                        render(&value)
                    } else {
                        value.to_string()
                    };
                    self.store.set(&key, &text).await?;
                    true
                }
                CacheShape::Hash => match value {
                    Value::Object(map) => {
                        let fields: Vec<(String, String)> = map
                            .iter()
                            .map(|(field, value)| (field.clone(), render(value)))
                            .collect();
                        self.store.hset_multiple(&key, &fields).await?;
                        !fields.is_empty()
                    }
                    Value::Array(items) => {
                        let fields: Vec<(String, String)> = items
                            .iter()
                            .enumerate()
                            .map(|(position, value)| (position.to_string(), render(value)))
                            .collect();
                        self.store.hset_multiple(&key, &fields).await?;
                        !fields.is_empty()
                    }
                    other => {
                        warn!(key = %key, value = %other, "hash value is not a map; key not written");
                        false
                    }
                },
                CacheShape::List => {
                    let items = members(value);
                    self.store.rpush(&key, &items).await?;
                    !items.is_empty()
                }
                CacheShape::Set => {
                    let items = members(value);
                    self.store.sadd(&key, &items).await?;
                    !items.is_empty()
                }
                CacheShape::SortedSet => {
                    let scored = scored_members(&key, value);
                    self.store.zadd(&key, &scored).await?;
                    !scored.is_empty()
                }
            };

            if !stored {
                continue;
            }
            if let Some(ttl) = self.ttl_for(entry) {
                self.store.expire(&key, ttl).await?;
            }
            written += 1;
        }

        Ok(written)
    }

    /// Returns the expiry for a freshly written key, with random jitter.
    fn ttl_for(&self, entry: &CacheEntry) -> Option<u64> {
        if entry.expire == 0 {
            return None;
        }
        let jitter = if self.registry.jitter_secs == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.registry.jitter_secs)
        };
        Some(entry.expire.saturating_add(jitter))
    }
}

/// Splits a key pattern into its index and the non-empty segments after it.
fn split_pattern<'a>(key_pattern: &'a str, delimiter: &str) -> (&'a str, Vec<String>) {
    if delimiter.is_empty() {
        return (key_pattern, Vec::new());
    }
    let mut parts = key_pattern.split(delimiter);
    let index = parts.next().unwrap_or_default();
    let segments = parts
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();
    (index, segments)
}

/// Escapes glob metacharacters so an index name matches literally.
fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Renders a scalar for storage: strings verbatim, everything else as JSON.
fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Flattens a collection value into members; a scalar becomes one member.
fn members(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(render).collect(),
        Value::Object(map) => map.values().map(render).collect(),
        Value::Null => Vec::new(),
        scalar => vec![render(&scalar)],
    }
}

/// Builds sorted-set members: objects map member to score, arrays score by
/// position.
fn scored_members(key: &str, value: Value) -> Vec<(String, f64)> {
    match value {
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(member, score)| {
                let parsed = match &score {
                    Value::Number(number) => number.as_f64(),
                    Value::String(text) => text.trim().parse::<f64>().ok(),
                    _ => None,
                };
                if parsed.is_none() {
                    warn!(key, member = %member, score = %score, "ignoring non-numeric score");
                }
                parsed.map(|score| (member, score))
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(position, member)| (render(member), position as f64))
            .collect(),
        Value::Null => Vec::new(),
        scalar => vec![(render(&scalar), 0.0)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::source::FnSource;
    use crate::SourceError;
    use serde_json::json;

    fn rebuilder(
        store: Arc<MemoryStore>,
        registry: CacheRegistry,
        sources: SourceRegistry,
    ) -> CacheRebuilder {
        CacheRebuilder::new(store, Arc::new(registry), Arc::new(sources))
    }

    fn fixed(value: Value) -> FnSource<impl Fn(&str, &[String], &[String]) -> Result<Option<Value>, SourceError>> {
        FnSource::new(move |_: &str, _: &[String], _: &[String]| Ok(Some(value.clone())))
    }

    #[test]
    fn test_split_pattern() {
        assert_eq!(split_pattern("role", ":"), ("role", vec![]));
        assert_eq!(split_pattern("role:", ":"), ("role", vec![]));
        assert_eq!(
            split_pattern("role:7:menus", ":"),
            ("role", vec!["7".to_string(), "menus".to_string()])
        );
        assert_eq!(split_pattern("*", ":"), ("*", vec![]));
    }

    #[test]
    fn test_render_and_members() {
        assert_eq!(render(&json!("a")), "a");
        assert_eq!(render(&json!(1)), "1");
        assert_eq!(render(&json!({"x": 1})), r#"{"x":1}"#);
        assert_eq!(members(json!(["a", 2])), vec!["a", "2"]);
        assert_eq!(members(json!("solo")), vec!["solo"]);
    }

    #[test]
    fn test_scored_members() {
        let scored = scored_members("k", json!({"a": 1.5, "b": "2", "c": "x"}));
        assert_eq!(scored, vec![("a".to_string(), 1.5), ("b".to_string(), 2.0)]);

        let positional = scored_members("k", json!(["x", "y"]));
        assert_eq!(positional, vec![("x".to_string(), 0.0), ("y".to_string(), 1.0)]);
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("role"), "role");
        assert_eq!(escape_glob("a*b?"), r"a\*b\?");
    }

    #[test]
    fn test_ttl_has_bounded_jitter() {
        let registry = CacheRegistry::new().with_jitter_secs(10);
        let rebuilder = rebuilder(Arc::new(MemoryStore::new()), registry, SourceRegistry::new());

        let permanent = CacheEntry::new("k", CacheShape::String, "s", "m");
        assert_eq!(rebuilder.ttl_for(&permanent), None);

        let expiring = permanent.with_expire(100);
        for _ in 0..50 {
            let ttl = rebuilder.ttl_for(&expiring).unwrap();
            assert!((100..=110).contains(&ttl));
        }
    }

    #[tokio::test]
    async fn test_hash_entry_is_loaded() {
        let store = Arc::new(MemoryStore::new());
        let registry = CacheRegistry::new().with_entry(
            "role_status",
            CacheEntry::new("role_status", CacheShape::Hash, "role", "status_map"),
        );
        let sources = SourceRegistry::new().with_source("role", fixed(json!({"1": 1, "2": 0})));

        let report = rebuilder(store.clone(), registry, sources)
            .rebuild("role_status", &[])
            .await
            .unwrap();

        assert_eq!(report.outcome("role_status"), Some(&EntryOutcome::Loaded { keys: 1 }));
        let hash = store.hgetall("role_status").await.unwrap();
        assert_eq!(hash.len(), 2);
        assert_eq!(hash["1"], "1");
        assert_eq!(hash["2"], "0");
    }

    #[tokio::test]
    async fn test_unknown_index_touches_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.set("role_status", "keep").await.unwrap();
        let registry = CacheRegistry::new().with_entry(
            "role_status",
            CacheEntry::new("role_status", CacheShape::Hash, "role", "status_map"),
        );

        let err = rebuilder(store.clone(), registry, SourceRegistry::new())
            .rebuild("menu", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::UnknownCacheIndex(ref index) if index == "menu"));
        assert_eq!(store.get("role_status").await.unwrap().as_deref(), Some("keep"));
    }

    #[tokio::test]
    async fn test_misconfigured_entries_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let registry = CacheRegistry::new()
            .with_entry("mismatch", CacheEntry::new("other", CacheShape::String, "s", "m"))
            .with_entry("unregistered", CacheEntry::new("unregistered", CacheShape::String, "nope", "m"))
            .with_entry("good", CacheEntry::new("good", CacheShape::String, "s", "m"));
        let sources = SourceRegistry::new().with_source("s", fixed(json!({"v": 1})));

        let report = rebuilder(store.clone(), registry, sources)
            .rebuild("*", &[])
            .await
            .unwrap();

        assert!(matches!(report.outcome("mismatch"), Some(EntryOutcome::Skipped { .. })));
        assert!(matches!(report.outcome("unregistered"), Some(EntryOutcome::Skipped { .. })));
        assert!(report.is_loaded("good"));
        assert_eq!(store.get("good").await.unwrap().as_deref(), Some(r#"{"v":1}"#));
        assert!(!store.exists("other").await.unwrap());
    }

    #[tokio::test]
    async fn test_non_collection_output_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let registry = CacheRegistry::new()
            .with_entry("a", CacheEntry::new("a", CacheShape::String, "s", "scalar"))
            .with_entry("b", CacheEntry::new("b", CacheShape::String, "s", "nothing"));
        let sources = SourceRegistry::new().with_source(
            "s",
            FnSource::new(|method: &str, _: &[String], _: &[String]| {
                Ok(match method {
                    "scalar" => Some(json!(false)),
                    _ => None,
                })
            }),
        );

        let report = rebuilder(store.clone(), registry, sources)
            .rebuild("*", &[])
            .await
            .unwrap();

        assert_eq!(report.len(), 2);
        assert_eq!(report.keys_written(), 0);
        assert!(store.keys().is_empty());
    }
}
