//! # Portcullis Cache
//!
//! Materializes relational source-of-truth data into a shared key-value cache.
//!
//! A static [`CacheRegistry`] maps an *index* name to a key pattern, a cache
//! [`CacheShape`], a data-source reference and an expiry. The
//! [`CacheRebuilder`] resolves a key pattern to registry entries, invalidates
//! the existing keys, invokes each entry's [`CacheSource`] and loads the
//! result into the declared shape.
//!
//! ```text
//! rebuild("role_status") ─▶ registry["role_status"] ─▶ DEL role_status, role_status:*
//!                                                   ─▶ source.fetch("status_map")
//!                                                   ─▶ HSET role_status 1 1 2 0
//! ```
//!
//! ## Consistency
//!
//! Rebuilds delete before they reload and nothing wraps a pass in a
//! transaction. Readers may observe a missing or partially loaded key while a
//! rebuild runs, and entries written before a failing source stay written.
//! Concurrent writers are last-writer-wins per key.
//!
//! ## Stores
//!
//! - [`MemoryStore`] - in-process store with TTLs and glob matching
//! - [`RedisStore`] - Redis via a multiplexed connection manager (feature `redis`)

#![doc(html_root_url = "https://docs.rs/portcullis-cache/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;
mod rebuild;
mod registry;
mod source;
mod store;

pub use error::{CacheError, SourceError, StoreError, StoreResult};
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use rebuild::{CacheRebuilder, EntryOutcome, RebuildReport};
pub use registry::{CacheEntry, CacheRegistry, CacheShape, DEFAULT_DELIMITER, DEFAULT_JITTER_SECS};
pub use source::{CacheSource, FnSource, SourceRegistry};
pub use store::CacheStore;
