//! The key-value store interface shared by the rebuild engine and the secret
//! resolver.

use crate::error::StoreResult;
use async_trait::async_trait;
use std::collections::HashMap;

/// A shared, multi-writer key-value cache with Redis data shapes.
///
/// Writers are last-writer-wins per key; no operation is versioned. Methods
/// taking a batch are no-ops on an empty batch.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Returns a string value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Returns true if the key exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Returns every field of a hash; empty when the key is absent.
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Returns the named hash fields, `None` for each absent field.
    async fn hmget(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>>;

    /// Sets a string value, clearing any expiry.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Sets hash fields.
    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()>;

    /// Appends to a list.
    async fn rpush(&self, key: &str, values: &[String]) -> StoreResult<()>;

    /// Adds set members.
    async fn sadd(&self, key: &str, members: &[String]) -> StoreResult<()>;

    /// Adds or updates sorted-set members.
    async fn zadd(&self, key: &str, members: &[(String, f64)]) -> StoreResult<()>;

    /// Sets a key's time to live.
    async fn expire(&self, key: &str, seconds: u64) -> StoreResult<()>;

    /// Deletes keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    /// Deletes every key matching a glob pattern without blocking the
    /// keyspace, returning how many were removed.
    async fn delete_matching(&self, pattern: &str) -> StoreResult<u64>;
}
