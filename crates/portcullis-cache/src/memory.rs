//! In-process cache store.
//!
//! Mirrors the Redis semantics the rebuild engine and secret resolver rely
//! on: typed values, `WRONGTYPE` on mismatched commands, expiry that is
//! cleared by `SET`, and glob-pattern deletion.

use crate::error::{StoreError, StoreResult};
use crate::store::CacheStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    String(String),
    Hash(HashMap<String, String>),
    List(Vec<String>),
    Set(BTreeSet<String>),
    SortedSet(Vec<(String, f64)>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// A [`CacheStore`] held in process memory.
///
/// Useful for tests and single-node deployments. An expired key reads as
/// absent at once; its slot is dropped on the next write to that key or by
/// any sweep ([`keys`](Self::keys), [`purge_expired`](Self::purge_expired)
/// or `delete_matching`).
///
/// # Example
///
/// ```
/// use portcullis_cache::{CacheStore, MemoryStore};
///
/// # tokio_test::block_on(async {
/// let store = MemoryStore::new();
/// store.set("greeting", "hi").await.unwrap();
/// assert_eq!(store.get("greeting").await.unwrap().as_deref(), Some("hi"));
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: RwLock<HashMap<String, Slot>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every live key, sorted. Expired slots are swept.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut slots = self.slots.write();
        slots.retain(|_, slot| slot.is_live(now));
        let mut keys: Vec<String> = slots.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drops every expired slot, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|_, slot| slot.is_live(now));
        before - slots.len()
    }

    /// Returns the elements of a list.
    #[must_use]
    pub fn lrange(&self, key: &str) -> Vec<String> {
        match self.live_value(key) {
            Some(Value::List(items)) => items,
            _ => Vec::new(),
        }
    }

    /// Returns the members of a set, sorted.
    #[must_use]
    pub fn smembers(&self, key: &str) -> Vec<String> {
        match self.live_value(key) {
            Some(Value::Set(members)) => members.into_iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Returns the members of a sorted set with scores, lowest score first.
    #[must_use]
    pub fn zrange(&self, key: &str) -> Vec<(String, f64)> {
        match self.live_value(key) {
            Some(Value::SortedSet(mut members)) => {
                members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
                members
            }
            _ => Vec::new(),
        }
    }

    /// Returns the remaining time to live of a key with an expiry.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.slots
            .read()
            .get(key)
            .filter(|slot| slot.is_live(now))
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn live_value(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        self.slots
            .read()
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value.clone())
    }

    /// Applies `update` to the live value at `key`, creating it with `init`
    /// when absent or expired.
    fn upsert<F>(&self, key: &str, init: fn() -> Value, update: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Value) -> StoreResult<()>,
    {
        let now = Instant::now();
        let mut slots = self.slots.write();
        if slots.get(key).is_some_and(|slot| !slot.is_live(now)) {
            slots.remove(key);
        }
        let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
            value: init(),
            expires_at: None,
        });
        update(&mut slot.value)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.live_value(key) {
            None => Ok(None),
            Some(Value::String(value)) => Ok(Some(value)),
            Some(_) => Err(StoreError::wrong_type(key)),
        }
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.live_value(key).is_some())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        match self.live_value(key) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(fields)) => Ok(fields),
            Some(_) => Err(StoreError::wrong_type(key)),
        }
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>> {
        let hash = self.hgetall(key).await?;
        Ok(fields.iter().map(|field| hash.get(*field).cloned()).collect())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.slots.write().insert(
            key.to_string(),
            Slot {
                value: Value::String(value.to_string()),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        self.upsert(
            key,
            || Value::Hash(HashMap::new()),
            |value| match value {
                Value::Hash(hash) => {
                    hash.extend(fields.iter().cloned());
                    Ok(())
                }
                _ => Err(StoreError::wrong_type(key)),
            },
        )
    }

    async fn rpush(&self, key: &str, values: &[String]) -> StoreResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        self.upsert(
            key,
            || Value::List(Vec::new()),
            |value| match value {
                Value::List(items) => {
                    items.extend(values.iter().cloned());
                    Ok(())
                }
                _ => Err(StoreError::wrong_type(key)),
            },
        )
    }

    async fn sadd(&self, key: &str, members: &[String]) -> StoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        self.upsert(
            key,
            || Value::Set(BTreeSet::new()),
            |value| match value {
                Value::Set(set) => {
                    set.extend(members.iter().cloned());
                    Ok(())
                }
                _ => Err(StoreError::wrong_type(key)),
            },
        )
    }

    async fn zadd(&self, key: &str, members: &[(String, f64)]) -> StoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        self.upsert(
            key,
            || Value::SortedSet(Vec::new()),
            |value| match value {
                Value::SortedSet(zset) => {
                    for (member, score) in members {
                        match zset.iter_mut().find(|(existing, _)| existing == member) {
                            Some(entry) => entry.1 = *score,
                            None => zset.push((member.clone(), *score)),
                        }
                    }
                    Ok(())
                }
                _ => Err(StoreError::wrong_type(key)),
            },
        )
    }

    async fn expire(&self, key: &str, seconds: u64) -> StoreResult<()> {
        let now = Instant::now();
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_mut(key).filter(|slot| slot.is_live(now)) {
            slot.expires_at = Some(now + Duration::from_secs(seconds));
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        let now = Instant::now();
        let mut slots = self.slots.write();
        let removed = keys
            .iter()
            .filter_map(|key| slots.remove(key))
            .filter(|slot| slot.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn delete_matching(&self, pattern: &str) -> StoreResult<u64> {
        let now = Instant::now();
        let mut slots = self.slots.write();
        let mut removed = 0u64;
        slots.retain(|key, slot| {
            if !slot.is_live(now) {
                return false;
            }
            if glob_match(pattern, key) {
                removed += 1;
                return false;
            }
            true
        });
        Ok(removed)
    }
}

/// Matches `text` against a Redis-style glob supporting `*`, `?` and `\`
/// escapes.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
                continue;
            }
            Some('?') => {
                p += 1;
                t += 1;
                continue;
            }
            Some('\\') if p + 1 < pattern.len() && pattern[p + 1] == text[t] => {
                p += 2;
                t += 1;
                continue;
            }
            Some(&c) if c != '\\' && c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }

        match star {
            Some((star_p, star_t)) => {
                p = star_p + 1;
                t = star_t + 1;
                star = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("role:*", "role:1"));
        assert!(glob_match("role:*", "role:"));
        assert!(!glob_match("role:*", "role"));
        assert!(!glob_match("role:*", "roles:1"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(glob_match("a*b*c", "a-x-b-y-c"));
        assert!(glob_match(r"lit\*", "lit*"));
        assert!(!glob_match(r"lit\*", "lit-x"));
    }

    #[tokio::test]
    async fn test_string_roundtrip_and_wrong_type() {
        let store = MemoryStore::new();
        store.set("s", "v").await.unwrap();
        assert_eq!(store.get("s").await.unwrap().as_deref(), Some("v"));
        assert!(store.exists("s").await.unwrap());

        let err = store
            .hset_multiple("s", &[("f".into(), "1".into())])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::WrongType { .. }));
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let store = MemoryStore::new();
        store
            .hset_multiple("h", &[("a".into(), "1".into()), ("b".into(), "2".into())])
            .await
            .unwrap();

        let all = store.hgetall("h").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["a"], "1");

        let some = store.hmget("h", &["b", "zz"]).await.unwrap();
        assert_eq!(some, vec![Some("2".to_string()), None]);

        assert!(store.hgetall("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_collections() {
        let store = MemoryStore::new();
        store.rpush("l", &["x".into(), "y".into()]).await.unwrap();
        store.rpush("l", &["z".into()]).await.unwrap();
        assert_eq!(store.lrange("l"), vec!["x", "y", "z"]);

        store.sadd("s", &["b".into(), "a".into(), "b".into()]).await.unwrap();
        assert_eq!(store.smembers("s"), vec!["a", "b"]);

        store
            .zadd("z", &[("m1".into(), 2.0), ("m2".into(), 1.0)])
            .await
            .unwrap();
        store.zadd("z", &[("m1".into(), 0.5)]).await.unwrap();
        assert_eq!(
            store.zrange("z"),
            vec![("m1".to_string(), 0.5), ("m2".to_string(), 1.0)]
        );
    }

    #[tokio::test]
    async fn test_empty_batches_create_nothing() {
        let store = MemoryStore::new();
        store.hset_multiple("h", &[]).await.unwrap();
        store.rpush("l", &[]).await.unwrap();
        store.sadd("s", &[]).await.unwrap();
        store.zadd("z", &[]).await.unwrap();
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_expiry() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        store.expire("k", 0).await.unwrap();
        assert!(!store.exists("k").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());

        store.set("k", "v").await.unwrap();
        store.expire("k", 3600).await.unwrap();
        let ttl = store.ttl("k").unwrap();
        assert!(ttl > Duration::from_secs(3590));

        // SET clears a previous expiry.
        store.set("k", "v2").await.unwrap();
        assert!(store.ttl("k").is_none());
    }

    #[tokio::test]
    async fn test_delete_and_delete_matching() {
        let store = MemoryStore::new();
        for key in ["role", "role:1", "role:2", "roles:1", "menu:1"] {
            store.set(key, "v").await.unwrap();
        }

        assert_eq!(store.delete_matching("role:*").await.unwrap(), 2);
        assert_eq!(store.keys(), vec!["menu:1", "role", "roles:1"]);

        let removed = store
            .delete(&["role".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.keys(), vec!["menu:1", "roles:1"]);
    }

    #[tokio::test]
    async fn test_sweeps_drop_expired_slots() {
        let store = MemoryStore::new();
        for key in ["a", "b", "role:1", "role:2"] {
            store.set(key, "v").await.unwrap();
        }
        store.expire("a", 0).await.unwrap();
        store.expire("role:2", 0).await.unwrap();

        // Only the live match counts; the expired "a" goes with the sweep.
        assert_eq!(store.delete_matching("role:*").await.unwrap(), 1);
        assert_eq!(store.purge_expired(), 0);
        assert_eq!(store.keys(), vec!["b"]);

        store.expire("b", 0).await.unwrap();
        assert_eq!(store.purge_expired(), 1);
        assert!(store.keys().is_empty());
    }
}
