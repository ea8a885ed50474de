//! Data sources that feed the rebuild engine.

use crate::error::SourceError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A source-of-truth collaborator that produces cache content.
///
/// `method` selects the query, `segments` are the key segments after the
/// index and `sub_keys` restrict the output for partial refreshes. A JSON
/// object or array is loaded; `None` or any other value makes the engine skip
/// the entry. An `Err` aborts the whole rebuild pass.
#[async_trait]
pub trait CacheSource: Send + Sync {
    /// Fetches the content for one registry entry.
    async fn fetch(
        &self,
        method: &str,
        segments: &[String],
        sub_keys: &[String],
    ) -> Result<Option<Value>, SourceError>;
}

/// Adapts a synchronous closure into a [`CacheSource`].
///
/// # Example
///
/// ```
/// use portcullis_cache::FnSource;
/// use serde_json::json;
///
/// let roles = FnSource::new(|method: &str, _segments: &[String], _sub_keys: &[String]| {
///     Ok(match method {
///         "status_map" => Some(json!({"1": 1, "2": 0})),
///         _ => None,
///     })
/// });
/// # let _ = roles;
/// ```
pub struct FnSource<F> {
    f: F,
}

impl<F> FnSource<F>
where
    F: Fn(&str, &[String], &[String]) -> Result<Option<Value>, SourceError> + Send + Sync,
{
    /// Wraps a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnSource<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> CacheSource for FnSource<F>
where
    F: Fn(&str, &[String], &[String]) -> Result<Option<Value>, SourceError> + Send + Sync,
{
    async fn fetch(
        &self,
        method: &str,
        segments: &[String],
        sub_keys: &[String],
    ) -> Result<Option<Value>, SourceError> {
        (self.f)(method, segments, sub_keys)
    }
}

/// Named data sources referenced by registry entries.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn CacheSource>>,
}

impl SourceRegistry {
    /// Creates an empty source registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `source` under `name`, replacing any previous one.
    #[must_use]
    pub fn with_source(mut self, name: impl Into<String>, source: impl CacheSource + 'static) -> Self {
        self.register(name, Arc::new(source));
        self
    }

    /// Registers a shared source under `name`.
    pub fn register(&mut self, name: impl Into<String>, source: Arc<dyn CacheSource>) {
        self.sources.insert(name.into(), source);
    }

    /// Returns the source registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn CacheSource>> {
        self.sources.get(name)
    }

    /// Returns the registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.names())
            .finish()
    }
}
