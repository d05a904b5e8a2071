//! Shared key-value store contract and the bundled in-memory backend.
//!
//! The pool never touches storage directly — everything goes through
//! [`KeyValueStore`], whose claim primitive is the serialization point for
//! at-most-once delivery. Any backend that can execute the claim atomically
//! (a Redis Lua script, a transactional embedded store, the mutex-guarded
//! [`MemoryStore`] here) satisfies the contract.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

/// Error from the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is unreachable or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// TTL-capable key-value store with counters, sets, and an atomic claim.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Write `value` under `key`, expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration)
    -> Result<(), StoreError>;

    /// Read a key. `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete a key; returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Whether a key currently exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// All live keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Remaining time-to-live of a key, `None` if absent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Atomically add `delta` to a counter, returning the new value.
    /// Counters do not expire.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Overwrite a counter.
    async fn put_counter(&self, key: &str, value: i64) -> Result<(), StoreError>;

    /// Read a counter, defaulting to zero.
    async fn get_counter(&self, key: &str) -> Result<i64, StoreError>;

    /// Add a member to a set.
    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Remove a member from a set.
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// All members of a set.
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Cardinality of a set.
    async fn set_card(&self, key: &str) -> Result<usize, StoreError>;

    /// Remove a set entirely.
    async fn delete_set(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically claim a block: if `used_key` is absent and `block_key` is
    /// live, write the used marker with the block's remaining TTL, delete the
    /// block, drop `member` from the index set, and return the block's value
    /// together with its remaining TTL.
    ///
    /// Two concurrent claims of the same block must never both succeed.
    async fn claim(
        &self,
        block_key: &str,
        used_key: &str,
        index_key: &str,
        member: &str,
    ) -> Result<Option<(Vec<u8>, Duration)>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    sets: HashMap<String, HashSet<String>>,
    counters: HashMap<String, i64>,
}

impl Inner {
    fn sweep(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);
    }
}

/// Single-process store backed by one mutex-guarded map.
///
/// Expiry is enforced lazily: every operation sweeps dead entries first. The
/// availability flag lets tests take the store "offline" without losing the
/// data behind it.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage (or recovery). Data is retained either way.
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.sweep();
        Ok(inner)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.guard().map(|_| ())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut inner = self.guard()?;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.guard()?;
        Ok(inner.entries.get(key).map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.guard()?;
        Ok(inner.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let inner = self.guard()?;
        Ok(inner.entries.contains_key(key))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.guard()?;
        Ok(inner
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let inner = self.guard()?;
        Ok(inner
            .entries
            .get(key)
            .map(|e| e.expires_at.saturating_duration_since(Instant::now())))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut inner = self.guard()?;
        let slot = inner.counters.entry(key.to_string()).or_insert(0);
        *slot += delta;
        Ok(*slot)
    }

    async fn put_counter(&self, key: &str, value: i64) -> Result<(), StoreError> {
        let mut inner = self.guard()?;
        inner.counters.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_counter(&self, key: &str) -> Result<i64, StoreError> {
        let inner = self.guard()?;
        Ok(inner.counters.get(key).copied().unwrap_or(0))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut inner = self.guard()?;
        inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut inner = self.guard()?;
        if let Some(set) = inner.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.guard()?;
        Ok(inner
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_card(&self, key: &str) -> Result<usize, StoreError> {
        let inner = self.guard()?;
        Ok(inner.sets.get(key).map(HashSet::len).unwrap_or(0))
    }

    async fn delete_set(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.guard()?;
        inner.sets.remove(key);
        Ok(())
    }

    async fn claim(
        &self,
        block_key: &str,
        used_key: &str,
        index_key: &str,
        member: &str,
    ) -> Result<Option<(Vec<u8>, Duration)>, StoreError> {
        let mut inner = self.guard()?;

        if inner.entries.contains_key(used_key) {
            return Ok(None);
        }
        let Some(entry) = inner.entries.remove(block_key) else {
            // Expired or already claimed; drop the stale index member too.
            if let Some(set) = inner.sets.get_mut(index_key) {
                set.remove(member);
            }
            return Ok(None);
        };

        let remaining = entry.expires_at.saturating_duration_since(Instant::now());
        inner.entries.insert(
            used_key.to_string(),
            Entry {
                value: b"1".to_vec(),
                expires_at: entry.expires_at,
            },
        );
        if let Some(set) = inner.sets.get_mut(index_key) {
            set.remove(member);
        }

        log::trace!("claimed {block_key} ({} bytes, ttl {remaining:?})", entry.value.len());
        Ok(Some((entry.value, remaining)))
    }
}
