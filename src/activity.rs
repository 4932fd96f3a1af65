//! Async activity registry.
//!
//! Resolves the "two possible continuations, one will run" pattern: code
//! announces an async unit by key before knowing which path will execute
//! it, the first continuation to start claims the key, and every other
//! path sees that it lost and declines. Claims are first-wins for the
//! rest of the owning transaction's lifetime, so a re-registration of an
//! already-claimed key cannot resurrect the race.
//!
//! Keys are spread across shards, each with its own lock; contention
//! scales with request volume, so a global lock is not acceptable here.

use crate::types::{ActivityKey, TransactionId};
use hashbrown::HashMap;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct ActivityEntry {
    txn: TransactionId,
    started: bool,
}

#[derive(Default)]
struct Shard {
    entries: Mutex<HashMap<ActivityKey, ActivityEntry>>,
}

/// Sharded registry of announced-but-not-yet-started activities.
pub(crate) struct ActivityRegistry {
    shards: Box<[Shard]>,
}

impl ActivityRegistry {
    /// Creates a registry with the given shard count (at least 1).
    pub(crate) fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        shards.resize_with(shard_count, Shard::default);
        Self {
            shards: shards.into_boxed_slice(),
        }
    }

    fn shard(&self, key: ActivityKey) -> &Shard {
        let spread = key.as_u64().wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 32;
        &self.shards[(spread as usize) % self.shards.len()]
    }

    /// Announces an activity against a transaction.
    ///
    /// Returns true if the key was newly registered. A key already
    /// present, claimed or not, is left untouched.
    pub(crate) fn register(&self, key: ActivityKey, txn: TransactionId) -> bool {
        let mut entries = self.shard(key).entries.lock();
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(
            key,
            ActivityEntry {
                txn,
                started: false,
            },
        );
        true
    }

    /// Attempts to claim the activity; first caller wins.
    ///
    /// Returns the owning transaction exactly once per key; `None` for
    /// every later caller and for unknown keys. Losing is the expected
    /// outcome for the path that did not run.
    pub(crate) fn start(&self, key: ActivityKey) -> Option<TransactionId> {
        let mut entries = self.shard(key).entries.lock();
        let entry = entries.get_mut(&key)?;
        if entry.started {
            return None;
        }
        entry.started = true;
        Some(entry.txn)
    }

    /// Drops the registration if it was never claimed.
    ///
    /// Returns true if a registration was removed. No-op for unknown or
    /// already-claimed keys.
    pub(crate) fn ignore_if_unstarted(&self, key: ActivityKey) -> bool {
        let mut entries = self.shard(key).entries.lock();
        match entries.get(&key) {
            Some(entry) if !entry.started => {
                entries.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Removes a key unconditionally (transaction finalization).
    pub(crate) fn purge(&self, key: ActivityKey) {
        self.shard(key).entries.lock().remove(&key);
    }

    /// Total registrations across shards (diagnostics only).
    pub(crate) fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.entries.lock().len())
            .sum()
    }
}
