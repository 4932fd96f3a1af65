//! Identifier types for engine entities.
//!
//! Transactions are identified by generational arena indices so that
//! handles held across concurrency boundaries go inert, rather than
//! dangling, once the transaction is finalized. Segments are plain
//! indices into their transaction's append-only tree.

use crate::util::ArenaIndex;
use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A unique identifier for a transaction in the registry.
///
/// The generation counter makes stale identifiers detectable: after the
/// transaction finalizes and its slot is reused, old ids resolve to
/// nothing and every operation through them becomes a no-op.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub(crate) ArenaIndex);

impl TransactionId {
    /// Creates a transaction ID from an arena index (internal use).
    #[must_use]
    pub(crate) const fn from_arena(index: ArenaIndex) -> Self {
        Self(index)
    }

    /// Returns the underlying arena index (internal use).
    #[must_use]
    pub(crate) const fn arena_index(self) -> ArenaIndex {
        self.0
    }

    /// Creates a transaction ID for testing purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(index: u32, generation: u32) -> Self {
        Self(ArenaIndex::new(index, generation))
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({}:{})", self.0.index(), self.0.generation())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0.index())
    }
}

/// A segment's position within its transaction's segment tree.
///
/// Only meaningful together with the owning [`TransactionId`]; the tree
/// is append-only, so segment ids are never reused within a transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub(crate) u32);

impl SegmentId {
    /// The root segment of every transaction.
    pub(crate) const ROOT: Self = Self(0);

    /// Returns the raw tree index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegmentId({})", self.0)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

static NEXT_ACTIVITY_KEY: AtomicU64 = AtomicU64::new(1);

/// Identity of an announced asynchronous activity.
///
/// Callers that have a natural identity for the async unit (a pointer, a
/// request id) can wrap it directly; callers that do not can allocate a
/// fresh key with [`ActivityKey::next`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivityKey(u64);

impl ActivityKey {
    /// Wraps an existing identity value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Allocates a fresh process-unique key.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_ACTIVITY_KEY.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw identity value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for ActivityKey {
    fn from(raw: u64) -> Self {
        Self::new(raw)
    }
}

impl fmt::Debug for ActivityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActivityKey({})", self.0)
    }
}

impl fmt::Display for ActivityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}
