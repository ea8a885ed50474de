//! Rebuild engine behavior against the in-memory store.

use parking_lot::Mutex;
use portcullis_cache::{
    CacheEntry, CacheError, CacheRebuilder, CacheRegistry, CacheShape, CacheStore, EntryOutcome,
    FnSource, MemoryStore, SourceError, SourceRegistry,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn engine(store: &Arc<MemoryStore>, registry: CacheRegistry, sources: SourceRegistry) -> CacheRebuilder {
    CacheRebuilder::new(store.clone(), Arc::new(registry), Arc::new(sources))
}

#[tokio::test]
async fn rebuild_hash_index_observes_delete_before_reload() {
    let store = Arc::new(MemoryStore::new());
    store
        .hset_multiple("role_status", &[("9".into(), "1".into())])
        .await
        .unwrap();

    // The source runs between deletion and reload, like a concurrent reader.
    let seen_during_fetch = Arc::new(Mutex::new(None));
    let probe_store = store.clone();
    let probe = seen_during_fetch.clone();
    let sources = SourceRegistry::new().with_source(
        "role",
        FnSource::new(move |method: &str, _: &[String], _: &[String]| {
            assert_eq!(method, "status_map");
            *probe.lock() = Some(probe_store.keys());
            Ok(Some(json!({"1": 1, "2": 0})))
        }),
    );
    let registry = CacheRegistry::new().with_entry(
        "role_status",
        CacheEntry::new("role_status", CacheShape::Hash, "role", "status_map"),
    );

    let report = engine(&store, registry, sources)
        .rebuild("role_status", &[])
        .await
        .unwrap();

    assert!(report.is_loaded("role_status"));
    assert_eq!(seen_during_fetch.lock().clone(), Some(Vec::<String>::new()));

    let hash = store.hgetall("role_status").await.unwrap();
    assert_eq!(hash.len(), 2);
    assert_eq!(hash["1"], "1");
    assert_eq!(hash["2"], "0");
    assert!(!hash.contains_key("9"));
}

#[tokio::test]
async fn fan_out_writes_independent_expiring_keys() {
    let store = Arc::new(MemoryStore::new());
    let registry = CacheRegistry::new().with_jitter_secs(60).with_entry(
        "user",
        CacheEntry::new("user:", CacheShape::Hash, "users", "profiles").with_expire(600),
    );
    let sources = SourceRegistry::new().with_source(
        "users",
        FnSource::new(|_: &str, _: &[String], _: &[String]| {
            Ok(Some(json!({
                "a": {"name": "alice", "age": 30},
                "b": {"name": "bob", "tags": ["x"]}
            })))
        }),
    );

    let report = engine(&store, registry, sources).rebuild("user", &[]).await.unwrap();

    assert_eq!(report.outcome("user"), Some(&EntryOutcome::Loaded { keys: 2 }));
    assert_eq!(store.keys(), vec!["user:a", "user:b"]);

    let alice = store.hgetall("user:a").await.unwrap();
    assert_eq!(alice["name"], "alice");
    assert_eq!(alice["age"], "30");
    let bob = store.hgetall("user:b").await.unwrap();
    assert_eq!(bob["tags"], r#"["x"]"#);

    for key in ["user:a", "user:b"] {
        let ttl = store.ttl(key).unwrap();
        assert!(ttl > Duration::from_secs(590), "{key} ttl {ttl:?}");
        assert!(ttl <= Duration::from_secs(660), "{key} ttl {ttl:?}");
    }
}

#[tokio::test]
async fn partial_refresh_keeps_untouched_sub_keys() {
    let store = Arc::new(MemoryStore::new());
    store.sadd("role_menu:1", &["10".into()]).await.unwrap();
    store.sadd("role_menu:2", &["stale".into()]).await.unwrap();

    let seen_sub_keys = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen_sub_keys.clone();
    let sources = SourceRegistry::new().with_source(
        "role",
        FnSource::new(move |_: &str, _: &[String], sub_keys: &[String]| {
            recorder.lock().extend(sub_keys.iter().cloned());
            Ok(Some(json!({"2": [20, 21]})))
        }),
    );
    let registry = CacheRegistry::new().with_entry(
        "role_menu",
        CacheEntry::new("role_menu:", CacheShape::Set, "role", "menu_ids"),
    );

    engine(&store, registry, sources)
        .rebuild("role_menu:", &["2".to_string()])
        .await
        .unwrap();

    assert_eq!(*seen_sub_keys.lock(), vec!["2".to_string()]);
    assert_eq!(store.smembers("role_menu:1"), vec!["10"]);
    // The touched key is replaced, not appended to.
    assert_eq!(store.smembers("role_menu:2"), vec!["20", "21"]);
}

#[tokio::test]
async fn bare_index_with_sub_keys_still_invalidates() {
    let store = Arc::new(MemoryStore::new());
    store.sadd("role_menu:1", &["10".into()]).await.unwrap();

    let sources = SourceRegistry::new().with_source(
        "role",
        FnSource::new(|_: &str, _: &[String], _: &[String]| Ok(Some(json!({"2": [20]})))),
    );
    let registry = CacheRegistry::new().with_entry(
        "role_menu",
        CacheEntry::new("role_menu:", CacheShape::Set, "role", "menu_ids"),
    );

    engine(&store, registry, sources)
        .rebuild("role_menu", &["2".to_string()])
        .await
        .unwrap();

    assert_eq!(store.keys(), vec!["role_menu:2"]);
}

#[tokio::test]
async fn key_segments_reach_the_source() {
    let store = Arc::new(MemoryStore::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let sources = SourceRegistry::new().with_source(
        "menu",
        FnSource::new(move |_: &str, segments: &[String], _: &[String]| {
            recorder.lock().extend(segments.iter().cloned());
            Ok(Some(json!(["home", "settings"])))
        }),
    );
    let registry = CacheRegistry::new().with_entry(
        "menu",
        CacheEntry::new("menu", CacheShape::List, "menu", "tree"),
    );

    engine(&store, registry, sources)
        .rebuild("menu:admin:7", &[])
        .await
        .unwrap();

    assert_eq!(*seen.lock(), vec!["admin".to_string(), "7".to_string()]);
    assert_eq!(store.lrange("menu"), vec!["home", "settings"]);
}

#[tokio::test]
async fn source_failure_aborts_but_keeps_earlier_entries() {
    let store = Arc::new(MemoryStore::new());
    store.set("later", "old").await.unwrap();

    let sources = SourceRegistry::new()
        .with_source(
            "ok",
            FnSource::new(|_: &str, _: &[String], _: &[String]| Ok(Some(json!(["x"])))),
        )
        .with_source(
            "broken",
            FnSource::new(|_: &str, _: &[String], _: &[String]| Err(SourceError::new("db offline"))),
        );
    let registry = CacheRegistry::new()
        .with_entry("first", CacheEntry::new("first", CacheShape::List, "ok", "m"))
        .with_entry("second", CacheEntry::new("second", CacheShape::List, "broken", "m"))
        .with_entry("later", CacheEntry::new("later", CacheShape::String, "ok", "m"));

    let err = engine(&store, registry, sources)
        .rebuild("*", &[])
        .await
        .unwrap_err();

    match err {
        CacheError::SourceFailed { index, .. } => assert_eq!(index, "second"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.lrange("first"), vec!["x"]);
    // Entries after the failing one are never reached.
    assert_eq!(store.get("later").await.unwrap().as_deref(), Some("old"));
}

#[tokio::test]
async fn sorted_set_and_string_fan_out() {
    let store = Arc::new(MemoryStore::new());
    let sources = SourceRegistry::new().with_source(
        "rank",
        FnSource::new(|method: &str, _: &[String], _: &[String]| {
            Ok(Some(match method {
                "scores" => json!({"board": {"alice": 3, "bob": 1}}),
                _ => json!({"x": "plain", "y": {"nested": true}}),
            }))
        }),
    );
    let registry = CacheRegistry::new()
        .with_entry("rank", CacheEntry::new("rank:", CacheShape::SortedSet, "rank", "scores"))
        .with_entry("label", CacheEntry::new("label:", CacheShape::String, "rank", "labels"));

    let report = engine(&store, registry, sources).rebuild("*", &[]).await.unwrap();

    assert_eq!(report.keys_written(), 3);
    assert_eq!(
        store.zrange("rank:board"),
        vec![("bob".to_string(), 1.0), ("alice".to_string(), 3.0)]
    );
    assert_eq!(store.get("label:x").await.unwrap().as_deref(), Some("plain"));
    assert_eq!(
        store.get("label:y").await.unwrap().as_deref(),
        Some(r#"{"nested":true}"#)
    );
}

#[tokio::test]
async fn report_iterates_in_registry_order() {
    let store = Arc::new(MemoryStore::new());
    let sources = SourceRegistry::new().with_source(
        "s",
        FnSource::new(|_: &str, _: &[String], _: &[String]| Ok(Some(Value::Array(vec![json!(1)])))),
    );
    let registry = CacheRegistry::new()
        .with_entry("zeta", CacheEntry::new("zeta", CacheShape::List, "s", "m"))
        .with_entry("alpha", CacheEntry::new("alpha", CacheShape::List, "s", "m"));

    let report = engine(&store, registry, sources).rebuild("*", &[]).await.unwrap();

    let order: Vec<&str> = report.iter().map(|(index, _)| index).collect();
    assert_eq!(order, vec!["zeta", "alpha"]);
}
