//! Transaction state and the public transaction handle.
//!
//! A transaction is exactly owned by its live tokens plus the one
//! implicit hold created at start. The record here is the shared state
//! those owners contend on; all multi-step coordination (issuance vs.
//! finalization, segment opens vs. the finalize CAS) is serialized on
//! the segment-tree mutex, while single-effect transitions (token
//! states, the root hold, the lifecycle state itself) are individual
//! atomics.

pub mod name;

use crate::distributed::{InboundHeaders, OutboundHeaders, TraceContext, TraceId, TransportType};
use crate::engine::EngineShared;
use crate::report::TimeoutCause;
use crate::segment::{Segment, SegmentKind, SegmentTree};
use crate::token::{Token, TokenSlot};
use crate::types::{ActivityKey, NamePriority, SegmentId, Time, TransactionId};
use core::fmt;
use name::PriorityName;
use parking_lot::Mutex;
use slab::Slab;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

const STATE_OPEN: u8 = 0;
const STATE_FINALIZED: u8 = 1;

const CAUSE_NONE: u8 = 0;
const CAUSE_TOKEN: u8 = 1;
const CAUSE_SEGMENT: u8 = 2;

const GATE_UNSET: u8 = 0;
const GATE_ACCEPTED: u8 = 1;
const GATE_INSERTED: u8 = 2;

/// Shared per-transaction state.
pub(crate) struct TransactionRecord {
    pub(crate) started_at: Time,
    /// `Open → Finalized`, CAS-once under the tree lock.
    state: AtomicU8,
    /// Live tokens plus the implicit root hold.
    pub(crate) ref_count: AtomicU32,
    /// True while the initiating context's implicit hold is counted.
    root_hold: AtomicBool,
    ignored: AtomicBool,
    timeout_cause: AtomicU8,
    /// Inbound-accept gate: accept happens at most once, never after an
    /// outbound insert.
    accept_gate: AtomicU8,
    pub(crate) name: Mutex<PriorityName>,
    pub(crate) tree: Mutex<SegmentTree>,
    pub(crate) tokens: Mutex<Slab<Arc<TokenSlot>>>,
    pub(crate) trace: Mutex<TraceContext>,
    /// Activity keys registered against this transaction, purged from
    /// the registry at finalization.
    pub(crate) activity_keys: Mutex<Vec<ActivityKey>>,
}

impl TransactionRecord {
    pub(crate) fn new(
        trace: TraceContext,
        started_at: Time,
        root_name: &str,
        segment_limit: usize,
    ) -> Self {
        Self {
            started_at,
            state: AtomicU8::new(STATE_OPEN),
            ref_count: AtomicU32::new(1),
            root_hold: AtomicBool::new(true),
            ignored: AtomicBool::new(false),
            timeout_cause: AtomicU8::new(CAUSE_NONE),
            accept_gate: AtomicU8::new(GATE_UNSET),
            name: Mutex::new(PriorityName::unset()),
            tree: Mutex::new(SegmentTree::new(root_name, started_at, segment_limit)),
            tokens: Mutex::new(Slab::new()),
            trace: Mutex::new(trace),
            activity_keys: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_OPEN
    }

    /// Attempts `Open → Finalized`. Callers must hold the tree lock.
    pub(crate) fn mark_finalized(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_OPEN,
                STATE_FINALIZED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Releases the implicit root hold; true on the first call only.
    pub(crate) fn release_root(&self) -> bool {
        self.root_hold.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn set_ignored(&self) {
        self.ignored.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_ignored(&self) -> bool {
        self.ignored.load(Ordering::SeqCst)
    }

    /// Records why the sweep force-completed this transaction. The
    /// first recorded cause wins.
    pub(crate) fn set_timeout_cause(&self, cause: TimeoutCause) {
        let raw = match cause {
            TimeoutCause::Token => CAUSE_TOKEN,
            TimeoutCause::Segment => CAUSE_SEGMENT,
        };
        let _ = self.timeout_cause.compare_exchange(
            CAUSE_NONE,
            raw,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub(crate) fn timeout_cause(&self) -> Option<TimeoutCause> {
        match self.timeout_cause.load(Ordering::SeqCst) {
            CAUSE_TOKEN => Some(TimeoutCause::Token),
            CAUSE_SEGMENT => Some(TimeoutCause::Segment),
            _ => None,
        }
    }

    /// Claims the accept gate; only the first accept, before any
    /// insert, wins.
    pub(crate) fn try_accept(&self) -> bool {
        self.accept_gate
            .compare_exchange(
                GATE_UNSET,
                GATE_ACCEPTED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Marks that outbound headers were inserted, closing the accept
    /// gate if it was still unset.
    pub(crate) fn mark_inserted(&self) {
        let _ = self.accept_gate.compare_exchange(
            GATE_UNSET,
            GATE_INSERTED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

impl fmt::Debug for TransactionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionRecord")
            .field("started_at", &self.started_at)
            .field("open", &self.is_open())
            .field("ref_count", &self.ref_count.load(Ordering::SeqCst))
            .field("ignored", &self.is_ignored())
            .finish()
    }
}

/// Handle to a live transaction.
///
/// Cheap to clone and hand across threads. The handle is weak: once the
/// transaction finalizes, every operation through any surviving handle
/// becomes an inert no-op. Instrumentation therefore never checks
/// whether tracing is available; it just calls.
#[derive(Clone)]
pub struct Transaction {
    shared: Arc<EngineShared>,
    id: TransactionId,
}

impl Transaction {
    pub(crate) fn new(shared: Arc<EngineShared>, id: TransactionId) -> Self {
        Self { shared, id }
    }

    /// The transaction's registry id.
    #[must_use]
    pub const fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns true while the transaction has not finalized.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.resolve(self.id).is_some()
    }

    /// Outstanding references: live tokens plus the implicit root hold.
    ///
    /// Diagnostic; the value may be stale by the time it is read.
    #[must_use]
    pub fn outstanding_refs(&self) -> u32 {
        self.shared
            .resolve(self.id)
            .map_or(0, |record| record.ref_count.load(Ordering::SeqCst))
    }

    /// Mints a token bound to the transaction root.
    ///
    /// Returns the inert token if the transaction has finished; callers
    /// treat that as "tracing unavailable", never as an error.
    #[must_use]
    pub fn token(&self) -> Token {
        self.shared.issue_token(self.id, SegmentId::ROOT)
    }

    /// Starts a segment under the transaction root.
    #[must_use]
    pub fn start_segment(&self, name: &str) -> Segment {
        self.shared
            .begin_segment(self.id, SegmentId::ROOT, name, SegmentKind::Local)
    }

    /// Handle to the root segment.
    #[must_use]
    pub fn root_segment(&self) -> Segment {
        if self.shared.resolve(self.id).is_some() {
            Segment::new(self.shared.clone(), self.id, SegmentId::ROOT)
        } else {
            Segment::inert()
        }
    }

    /// Applies the naming priority law to the transaction name.
    ///
    /// The name is composed as `category/part/...`. Returns true if the
    /// name changed; a losing assignment is a silent no-op.
    pub fn set_name(
        &self,
        priority: NamePriority,
        replace: bool,
        category: &str,
        parts: &[&str],
    ) -> bool {
        self.shared
            .set_transaction_name(self.id, priority, replace, category, parts)
    }

    /// The current priority-resolved name, if the transaction is live.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.shared
            .resolve(self.id)
            .map(|record| record.name.lock().as_str().to_string())
    }

    /// The distributed trace id, if the transaction is live.
    #[must_use]
    pub fn trace_id(&self) -> Option<TraceId> {
        self.shared
            .resolve(self.id)
            .map(|record| record.trace.lock().trace_id())
    }

    /// Releases the initiating context's implicit hold.
    ///
    /// Idempotent single-effect, exactly like a token's `expire`.
    /// Returns true if this call released it.
    pub fn expire_root(&self) -> bool {
        self.shared.expire_root(self.id)
    }

    /// Ends the root segment (idempotent).
    pub fn end_root_segment(&self) -> bool {
        self.shared.end_segment(self.id, SegmentId::ROOT)
    }

    /// Expires every outstanding token at once.
    ///
    /// For callers that know no continuation can run anymore. Returns
    /// how many tokens this call expired.
    pub fn expire_all_tokens(&self) -> u32 {
        self.shared.expire_all_tokens(self.id)
    }

    /// Marks the transaction ignored: it still finalizes (so resources
    /// are reclaimed) but the finalizer is told to drop it.
    pub fn ignore(&self) {
        if let Some(record) = self.shared.resolve(self.id) {
            record.set_ignored();
        }
    }

    /// Announces an async activity against this transaction.
    ///
    /// Returns true if the key was newly registered.
    pub fn register_async_activity(&self, key: ActivityKey) -> bool {
        self.shared.register_activity(self.id, key)
    }

    /// Adopts the distributed trace context of an inbound carrier.
    ///
    /// Effective at most once per transaction and only before any
    /// outbound insert. Malformed or absent headers are logged and
    /// ignored. Returns true if the context was adopted.
    pub fn accept_distributed_trace_headers(
        &self,
        transport: TransportType,
        headers: &dyn InboundHeaders,
    ) -> bool {
        self.shared.accept_headers(self.id, transport, headers)
    }

    /// Writes this transaction's trace context into an outbound carrier.
    ///
    /// Returns true if headers were written.
    pub fn insert_distributed_trace_headers(&self, headers: &mut dyn OutboundHeaders) -> bool {
        self.shared.insert_headers(self.id, headers)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
