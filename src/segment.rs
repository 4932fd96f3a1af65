//! Append-only segment tree.
//!
//! Records the causal/temporal shape of work inside one transaction.
//! Nodes are appended, never removed; parent/child links are fixed at
//! creation. The tree also maintains the open-segment count the
//! finalization predicate reads, so "may this transaction finalize" is
//! O(1) for the hot path.
//!
//! The tree itself is not synchronized; the owning transaction guards it
//! with a mutex. Everything here is plain data manipulation.

use crate::transaction::name::PriorityName;
use crate::types::{NamePriority, SegmentId, Time};
use smallvec::SmallVec;

/// How a segment came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    /// The transaction's root segment.
    Root,
    /// Started by code already attributed to the transaction.
    Local,
    /// Continuation opened by a token link across a concurrency boundary.
    Async,
}

/// A single named, timed span in the tree.
#[derive(Debug, Clone)]
pub(crate) struct SegmentRecord {
    pub(crate) name: PriorityName,
    pub(crate) kind: SegmentKind,
    pub(crate) parent: Option<SegmentId>,
    pub(crate) children: SmallVec<[SegmentId; 4]>,
    pub(crate) started_at: Time,
    pub(crate) ended_at: Option<Time>,
}

impl SegmentRecord {
    /// Returns true if the segment has not ended.
    pub(crate) const fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// The per-transaction tree of segments.
#[derive(Debug)]
pub(crate) struct SegmentTree {
    records: Vec<SegmentRecord>,
    open_count: u32,
    limit: usize,
    truncated: u64,
}

impl SegmentTree {
    /// Creates a tree containing an open root segment.
    pub(crate) fn new(root_name: &str, started_at: Time, limit: usize) -> Self {
        let root = SegmentRecord {
            name: PriorityName::assigned(NamePriority::None, root_name),
            kind: SegmentKind::Root,
            parent: None,
            children: SmallVec::new(),
            started_at,
            ended_at: None,
        };
        Self {
            records: vec![root],
            open_count: 1,
            limit,
            truncated: 0,
        }
    }

    /// Appends a new open segment under `parent`.
    ///
    /// Returns `None` when the parent id is unknown or the segment limit
    /// is reached; the caller surfaces that as an inert handle.
    pub(crate) fn begin(
        &mut self,
        name: &str,
        kind: SegmentKind,
        parent: SegmentId,
        now: Time,
    ) -> Option<SegmentId> {
        if parent.index() as usize >= self.records.len() {
            return None;
        }
        if self.records.len() >= self.limit {
            self.truncated += 1;
            return None;
        }
        let id = SegmentId(u32::try_from(self.records.len()).ok()?);
        self.records.push(SegmentRecord {
            name: PriorityName::assigned(NamePriority::None, name),
            kind,
            parent: Some(parent),
            children: SmallVec::new(),
            started_at: now,
            ended_at: None,
        });
        self.records[parent.index() as usize].children.push(id);
        self.open_count += 1;
        Some(id)
    }

    /// Sets the end time if unset; returns true if this call closed it.
    ///
    /// Ending a segment does not end its children.
    pub(crate) fn end(&mut self, id: SegmentId, now: Time) -> bool {
        let Some(record) = self.records.get_mut(id.index() as usize) else {
            return false;
        };
        if record.ended_at.is_some() {
            return false;
        }
        record.ended_at = Some(now);
        self.open_count -= 1;
        true
    }

    /// Applies the naming priority law to one segment.
    pub(crate) fn set_name(
        &mut self,
        id: SegmentId,
        priority: NamePriority,
        replace: bool,
        name: &str,
    ) -> bool {
        self.records
            .get_mut(id.index() as usize)
            .is_some_and(|record| record.name.update(priority, replace, name))
    }

    /// Force-ends every open segment (stale-transaction sweep).
    ///
    /// Returns how many segments this closed.
    pub(crate) fn end_all_open(&mut self, now: Time) -> u32 {
        let mut closed = 0;
        for record in &mut self.records {
            if record.ended_at.is_none() {
                record.ended_at = Some(now);
                closed += 1;
            }
        }
        self.open_count -= closed;
        closed
    }

    /// Returns true if the root segment has an end time.
    pub(crate) fn root_ended(&self) -> bool {
        self.records[SegmentId::ROOT.index() as usize]
            .ended_at
            .is_some()
    }

    /// Number of segments still open (root included).
    pub(crate) const fn open_count(&self) -> u32 {
        self.open_count
    }

    /// Number of segment starts refused by the limit.
    pub(crate) const fn truncated(&self) -> u64 {
        self.truncated
    }

    /// Total recorded segments.
    pub(crate) const fn len(&self) -> usize {
        self.records.len()
    }

    /// Read access to one record.
    pub(crate) fn get(&self, id: SegmentId) -> Option<&SegmentRecord> {
        self.records.get(id.index() as usize)
    }

    /// Iterates records in creation order (root first).
    pub(crate) fn iter(&self) -> impl Iterator<Item = (SegmentId, &SegmentRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, record)| (SegmentId(i as u32), record))
    }
}

struct SegmentInner {
    shared: std::sync::Arc<crate::engine::EngineShared>,
    txn: crate::types::TransactionId,
    id: SegmentId,
}

/// Handle to one segment of a live transaction.
///
/// Cheap to clone and hand across threads. A handle whose transaction
/// has finalized, or that was returned from a refused segment start, is
/// inert: every operation is a defined no-op.
#[derive(Clone)]
pub struct Segment {
    inner: Option<std::sync::Arc<SegmentInner>>,
}

impl Segment {
    pub(crate) fn new(
        shared: std::sync::Arc<crate::engine::EngineShared>,
        txn: crate::types::TransactionId,
        id: SegmentId,
    ) -> Self {
        Self {
            inner: Some(std::sync::Arc::new(SegmentInner { shared, txn, id })),
        }
    }

    /// The inert no-op handle.
    #[must_use]
    pub const fn inert() -> Self {
        Self { inner: None }
    }

    /// Returns true if this handle performs no work.
    #[must_use]
    pub const fn is_inert(&self) -> bool {
        self.inner.is_none()
    }

    /// The segment's id within its transaction, if live.
    #[must_use]
    pub fn id(&self) -> Option<SegmentId> {
        self.inner.as_ref().map(|inner| inner.id)
    }

    /// The owning transaction's id, if live.
    #[must_use]
    pub fn transaction_id(&self) -> Option<crate::types::TransactionId> {
        self.inner.as_ref().map(|inner| inner.txn)
    }

    /// Starts a child segment under this one.
    pub fn start_child(&self, name: &str) -> Self {
        match &self.inner {
            Some(inner) => {
                inner
                    .shared
                    .begin_segment(inner.txn, inner.id, name, SegmentKind::Local)
            }
            None => Self::inert(),
        }
    }

    /// Sets the end time if unset; the second call is a no-op.
    ///
    /// Returns true if this call closed the segment.
    pub fn end(&self) -> bool {
        match &self.inner {
            Some(inner) => inner.shared.end_segment(inner.txn, inner.id),
            None => false,
        }
    }

    /// Applies the naming priority law to this segment.
    pub fn set_name(&self, priority: NamePriority, replace: bool, name: &str) -> bool {
        match &self.inner {
            Some(inner) => inner
                .shared
                .set_segment_name(inner.txn, inner.id, priority, replace, name),
            None => false,
        }
    }

    /// Mints a token bound to this point of the transaction.
    ///
    /// Continuations linked through the token parent under this segment.
    pub fn token(&self) -> crate::token::Token {
        match &self.inner {
            Some(inner) => inner.shared.issue_token(inner.txn, inner.id),
            None => crate::token::Token::inert(),
        }
    }
}

impl core::fmt::Debug for Segment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("Segment")
                .field("txn", &inner.txn)
                .field("id", &inner.id)
                .finish(),
            None => f.write_str("Segment(inert)"),
        }
    }
}
