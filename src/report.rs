//! Finished-transaction snapshots and the finalizer boundary.
//!
//! When a transaction's last hold is released and its tree is closed,
//! the engine freezes everything into a [`FinishedTransaction`] and hands
//! it to the [`Finalizer`] exactly once. The snapshot is plain owned
//! data: by the time the finalizer sees it, the live transaction is
//! already gone from the registry and nothing can mutate the tree.

use crate::distributed::{ParentContext, SpanGuid, TraceContext, TraceId};
use crate::segment::{SegmentKind, SegmentTree};
use crate::transaction::name::PriorityName;
use crate::types::{NamePriority, Time};
use parking_lot::Mutex;
use serde::Serialize;

/// Why the sweep declared a transaction incomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutCause {
    /// An outstanding token exceeded the configured age.
    Token,
    /// Segments were still open after every hold was released.
    Segment,
}

/// One segment in a finished transaction, in creation order (root first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentSummary {
    /// The segment's final name.
    pub name: String,
    /// How the segment came to exist.
    pub kind: SegmentKind,
    /// Tree index of the parent; `None` for the root.
    pub parent: Option<u32>,
    /// Tree indices of children, in insertion order.
    pub children: Vec<u32>,
    /// When the segment started.
    pub started_at: Time,
    /// When the segment ended. Always set: a transaction cannot
    /// finalize with an open segment.
    pub ended_at: Time,
}

impl SegmentSummary {
    /// Nanoseconds the segment spanned.
    #[must_use]
    pub const fn duration_nanos(&self) -> u64 {
        self.ended_at.duration_since(self.started_at)
    }
}

/// The immutable record of a completed transaction.
#[derive(Debug, Clone, Serialize)]
pub struct FinishedTransaction {
    /// Final priority-resolved name.
    pub name: String,
    /// Priority rank of the final name.
    pub name_priority: NamePriority,
    /// The distributed trace this transaction belonged to.
    pub trace_id: TraceId,
    /// This transaction's span identity within the trace.
    pub guid: SpanGuid,
    /// Upstream linkage, if an inbound carrier was accepted.
    pub parent: Option<ParentContext>,
    /// Whether the trace was sampled.
    pub sampled: bool,
    /// True if the transaction was marked ignored; finalizers should
    /// drop it rather than report it.
    pub ignored: bool,
    /// Set when the sweep force-completed the transaction.
    pub timeout: Option<TimeoutCause>,
    /// When the transaction started.
    pub started_at: Time,
    /// When the transaction finalized.
    pub finished_at: Time,
    /// Segments in creation order; index 0 is the root.
    pub segments: Vec<SegmentSummary>,
    /// Segment starts refused by the per-transaction limit.
    pub segments_truncated: u64,
}

impl FinishedTransaction {
    /// Nanoseconds from start to finalization.
    #[must_use]
    pub const fn duration_nanos(&self) -> u64 {
        self.finished_at.duration_since(self.started_at)
    }

    /// The root segment.
    #[must_use]
    pub fn root(&self) -> &SegmentSummary {
        &self.segments[0]
    }

    /// True if the sweep had to force-complete this transaction.
    #[must_use]
    pub const fn is_incomplete(&self) -> bool {
        self.timeout.is_some()
    }

    pub(crate) fn collect(
        tree: &SegmentTree,
        name: &PriorityName,
        trace: &TraceContext,
        ignored: bool,
        timeout: Option<TimeoutCause>,
        started_at: Time,
        finished_at: Time,
    ) -> Self {
        let segments = tree
            .iter()
            .map(|(_, record)| SegmentSummary {
                name: record.name.as_str().to_string(),
                kind: record.kind,
                parent: record.parent.map(crate::types::SegmentId::index),
                children: record.children.iter().map(|c| c.index()).collect(),
                started_at: record.started_at,
                // Finalization requires open_count == 0, so every record
                // has an end time here; started_at is a safe fallback.
                ended_at: record.ended_at.unwrap_or(record.started_at),
            })
            .collect();
        Self {
            name: name.as_str().to_string(),
            name_priority: name.priority(),
            trace_id: trace.trace_id(),
            guid: trace.guid(),
            parent: trace.parent(),
            sampled: trace.sampled(),
            ignored,
            timeout,
            started_at,
            finished_at,
            segments,
            segments_truncated: tree.truncated(),
        }
    }
}

/// Consumer of completed transactions.
///
/// Called exactly once per transaction, synchronously from whichever
/// engine call satisfied the finalization predicate, with no engine
/// locks held. Implementations may call back into the engine freely.
pub trait Finalizer: Send + Sync + 'static {
    /// Receives a completed transaction.
    fn on_transaction_complete(&self, transaction: FinishedTransaction);
}

impl<T: Finalizer> Finalizer for std::sync::Arc<T> {
    fn on_transaction_complete(&self, transaction: FinishedTransaction) {
        (**self).on_transaction_complete(transaction);
    }
}

/// Adapts a closure into a [`Finalizer`]; see [`finalizer_fn`].
pub struct FinalizerFn<F>(F);

impl<F> Finalizer for FinalizerFn<F>
where
    F: Fn(FinishedTransaction) + Send + Sync + 'static,
{
    fn on_transaction_complete(&self, transaction: FinishedTransaction) {
        (self.0)(transaction);
    }
}

/// Wraps a closure as a [`Finalizer`].
///
/// ```
/// use tracelink::{finalizer_fn, TraceEngine};
///
/// let engine = TraceEngine::new(finalizer_fn(|finished| {
///     println!("{} took {}ns", finished.name, finished.duration_nanos());
/// }));
/// # drop(engine);
/// ```
pub fn finalizer_fn<F>(f: F) -> FinalizerFn<F>
where
    F: Fn(FinishedTransaction) + Send + Sync + 'static,
{
    FinalizerFn(f)
}

/// Finalizer that buffers completed transactions for later inspection.
///
/// The harvest loop of an embedding agent drains it periodically; tests
/// read it directly.
#[derive(Debug, Default)]
pub struct CollectingFinalizer {
    completed: Mutex<Vec<FinishedTransaction>>,
}

impl CollectingFinalizer {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.completed.lock().len()
    }

    /// True if nothing has completed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.completed.lock().is_empty()
    }

    /// Removes and returns everything buffered so far.
    #[must_use]
    pub fn drain(&self) -> Vec<FinishedTransaction> {
        core::mem::take(&mut *self.completed.lock())
    }
}

impl Finalizer for CollectingFinalizer {
    fn on_transaction_complete(&self, transaction: FinishedTransaction) {
        self.completed.lock().push(transaction);
    }
}
