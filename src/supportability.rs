//! Supportability counters.
//!
//! Cheap atomic tallies of engine activity: how many tokens were minted,
//! how they were resolved, how many transactions completed cleanly. A
//! nonzero timeout count is the signal that some instrumented library is
//! leaking tokens. These are diagnostics for the engine itself, not part
//! of any reported trace.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated with relaxed atomics on the hot path.
#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    pub(crate) tokens_created: AtomicU64,
    pub(crate) tokens_expired: AtomicU64,
    pub(crate) tokens_timed_out: AtomicU64,
    pub(crate) links_succeeded: AtomicU64,
    pub(crate) links_ignored: AtomicU64,
    pub(crate) transactions_started: AtomicU64,
    pub(crate) transactions_finalized: AtomicU64,
    pub(crate) transactions_incomplete: AtomicU64,
}

impl EngineCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            tokens_created: self.tokens_created.load(Ordering::Relaxed),
            tokens_expired: self.tokens_expired.load(Ordering::Relaxed),
            tokens_timed_out: self.tokens_timed_out.load(Ordering::Relaxed),
            links_succeeded: self.links_succeeded.load(Ordering::Relaxed),
            links_ignored: self.links_ignored.load(Ordering::Relaxed),
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_finalized: self.transactions_finalized.load(Ordering::Relaxed),
            transactions_incomplete: self.transactions_incomplete.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CounterSnapshot {
    /// Tokens minted by `issue_token`.
    pub tokens_created: u64,
    /// Tokens resolved by an `expire` call (any path).
    pub tokens_expired: u64,
    /// Tokens force-expired by the stale sweep.
    pub tokens_timed_out: u64,
    /// `link` calls that opened a continuation segment.
    pub links_succeeded: u64,
    /// `link` calls that were no-ops (token already linked or expired).
    pub links_ignored: u64,
    /// Transactions started.
    pub transactions_started: u64,
    /// Transactions handed to the finalizer.
    pub transactions_finalized: u64,
    /// Finalized transactions flagged incomplete by the sweep.
    pub transactions_incomplete: u64,
}
