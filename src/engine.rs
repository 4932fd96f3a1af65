//! The trace engine: registry, lifecycle orchestration, sweep.
//!
//! Everything stateful meets here. The engine owns the transaction
//! registry, mints transactions and tokens, applies the single-effect
//! transition rules, and decides finalization.
//!
//! Locking discipline, per transaction: the segment-tree mutex is the
//! serialization point for every step that can either satisfy the
//! finalization predicate or invalidate it (token issuance, segment
//! open/close, reference release, the finalize CAS itself). Single-shot
//! transitions (token states, the root hold, flags) are lone atomics.
//! Leaf mutexes (name, trace, token table, activity keys) are only ever
//! taken after the tree lock, never the other way around, and the
//! finalizer callback always runs with no locks held.

use crate::activity::ActivityRegistry;
use crate::config::EngineConfig;
use crate::distributed::{
    InboundHeaders, OutboundHeaders, TraceContext, Traceparent, TransportType,
    TRACEPARENT_HEADER, TRACESTATE_ENTRY_KEY, TRACESTATE_HEADER,
};
use crate::report::{FinishedTransaction, Finalizer, TimeoutCause};
use crate::segment::{Segment, SegmentKind, SegmentTree};
use crate::supportability::{CounterSnapshot, EngineCounters};
use crate::token::{Token, TokenSlot};
use crate::tracing_compat::debug;
use crate::transaction::{Transaction, TransactionRecord};
use crate::transaction::name::compose_name;
use crate::types::{ActivityKey, Clock, NamePriority, SegmentId, SystemClock, TransactionId};
use crate::util::{Arena, EntropySource, OsEntropy};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Name given to every root segment.
const ROOT_SEGMENT_NAME: &str = "ROOT";

/// Name given to continuation segments opened by a token link; callers
/// rename them through the priority law.
const CONTINUATION_SEGMENT_NAME: &str = "Continuation";

/// What one sweep pass reclaimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    /// Tokens force-expired for exceeding the configured age.
    pub tokens_timed_out: u64,
    /// Open segments force-ended on unowned stale transactions.
    pub segments_force_closed: u64,
    /// Transactions finalized as a result of this pass.
    pub transactions_finalized: u64,
}

impl SweepSummary {
    /// Returns true if the pass found nothing to reclaim.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.tokens_timed_out == 0
            && self.segments_force_closed == 0
            && self.transactions_finalized == 0
    }
}

pub(crate) struct EngineShared {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn EntropySource>,
    finalizer: Box<dyn Finalizer>,
    registry: RwLock<Arena<Arc<TransactionRecord>>>,
    activities: ActivityRegistry,
    counters: EngineCounters,
}

impl EngineShared {
    pub(crate) fn resolve(&self, id: TransactionId) -> Option<Arc<TransactionRecord>> {
        self.registry.read().get(id.arena_index()).cloned()
    }

    fn start_transaction(self: &Arc<Self>) -> Transaction {
        let now = self.clock.now();
        let trace = TraceContext::new_root(self.entropy.as_ref());
        let record = Arc::new(TransactionRecord::new(
            trace,
            now,
            ROOT_SEGMENT_NAME,
            self.config.segment_limit,
        ));
        let id = TransactionId::from_arena(self.registry.write().insert(record));
        EngineCounters::bump(&self.counters.transactions_started);
        debug!(txn = %id, "transaction started");
        Transaction::new(self.clone(), id)
    }

    pub(crate) fn issue_token(self: &Arc<Self>, txn: TransactionId, from: SegmentId) -> Token {
        let Some(record) = self.resolve(txn) else {
            return Token::inert();
        };
        let slot = {
            let _tree = record.tree.lock();
            if !record.is_open() {
                return Token::inert();
            }
            record.ref_count.fetch_add(1, Ordering::SeqCst);
            let mut tokens = record.tokens.lock();
            let entry = tokens.vacant_entry();
            let slot = Arc::new(TokenSlot::new(entry.key(), from, self.clock.now()));
            entry.insert(slot.clone());
            slot
        };
        EngineCounters::bump(&self.counters.tokens_created);
        debug!(txn = %txn, "token issued");
        Token::new(self.clone(), txn, slot)
    }

    pub(crate) fn token_link(
        self: &Arc<Self>,
        txn: TransactionId,
        slot: &Arc<TokenSlot>,
    ) -> Segment {
        let Some(record) = self.resolve(txn) else {
            EngineCounters::bump(&self.counters.links_ignored);
            return Segment::inert();
        };
        if !slot.try_link() {
            EngineCounters::bump(&self.counters.links_ignored);
            return Segment::inert();
        }
        let opened = {
            let mut tree = record.tree.lock();
            // A concurrent expire of this same token may have finalized
            // the transaction before we got the lock.
            let opened = if record.is_open() {
                tree.begin(
                    CONTINUATION_SEGMENT_NAME,
                    SegmentKind::Async,
                    slot.issued_from,
                    self.clock.now(),
                )
            } else {
                None
            };
            // Recorded under the tree lock so a racing expire either
            // sees the segment and closes it, or does not and we never
            // open it at all.
            *slot.link_segment.lock() = opened;
            opened
        };
        match opened {
            Some(id) => {
                EngineCounters::bump(&self.counters.links_succeeded);
                debug!(txn = %txn, segment = %id, "token linked");
                Segment::new(self.clone(), txn, id)
            }
            None => {
                EngineCounters::bump(&self.counters.links_ignored);
                Segment::inert()
            }
        }
    }

    pub(crate) fn token_expire(&self, txn: TransactionId, slot: &Arc<TokenSlot>) -> bool {
        let Some(record) = self.resolve(txn) else {
            // Transaction already gone (e.g. the sweep force-expired
            // this token); make the late handle consistent anyway.
            slot.resolve();
            return false;
        };
        let (effect, _) = self.expire_slot(txn, &record, slot, false);
        effect
    }

    pub(crate) fn token_link_and_expire(
        self: &Arc<Self>,
        txn: TransactionId,
        slot: &Arc<TokenSlot>,
    ) -> Segment {
        let Some(record) = self.resolve(txn) else {
            slot.resolve();
            EngineCounters::bump(&self.counters.links_ignored);
            return Segment::inert();
        };
        let prior = slot.resolve();
        if !prior.is_live() {
            EngineCounters::bump(&self.counters.links_ignored);
            return Segment::inert();
        }
        let now = self.clock.now();
        let mut out = Segment::inert();
        let finished = {
            let mut tree = record.tree.lock();
            if prior == crate::token::TokenState::Active {
                // The continuation is handed to the caller still open;
                // ending it is what allows finalization.
                match tree.begin(
                    CONTINUATION_SEGMENT_NAME,
                    SegmentKind::Async,
                    slot.issued_from,
                    now,
                ) {
                    Some(id) => {
                        EngineCounters::bump(&self.counters.links_succeeded);
                        out = Segment::new(self.clone(), txn, id);
                    }
                    None => EngineCounters::bump(&self.counters.links_ignored),
                }
            } else if let Some(seg) = slot.link_segment.lock().take() {
                tree.end(seg, now);
            }
            record.tokens.lock().try_remove(slot.key);
            record.ref_count.fetch_sub(1, Ordering::SeqCst);
            self.maybe_finalize_locked(&record, &mut tree)
        };
        EngineCounters::bump(&self.counters.tokens_expired);
        debug!(txn = %txn, "token linked and expired");
        if let Some(finished) = finished {
            self.complete_finalization(txn, &record, finished);
        }
        out
    }

    /// Performs the single expiration effect on a live slot.
    ///
    /// Returns `(effect_performed, finalized)`.
    fn expire_slot(
        &self,
        txn: TransactionId,
        record: &Arc<TransactionRecord>,
        slot: &Arc<TokenSlot>,
        timed_out: bool,
    ) -> (bool, bool) {
        if !slot.resolve().is_live() {
            return (false, false);
        }
        let finished = {
            let mut tree = record.tree.lock();
            if let Some(seg) = slot.link_segment.lock().take() {
                tree.end(seg, self.clock.now());
            }
            record.tokens.lock().try_remove(slot.key);
            record.ref_count.fetch_sub(1, Ordering::SeqCst);
            if timed_out {
                record.set_timeout_cause(TimeoutCause::Token);
            }
            self.maybe_finalize_locked(record, &mut tree)
        };
        if timed_out {
            EngineCounters::bump(&self.counters.tokens_timed_out);
            debug!(txn = %txn, "token force-expired by sweep");
        } else {
            EngineCounters::bump(&self.counters.tokens_expired);
            debug!(txn = %txn, "token expired");
        }
        match finished {
            Some(finished) => {
                self.complete_finalization(txn, record, finished);
                (true, true)
            }
            None => (true, false),
        }
    }

    /// Expires every outstanding token of one transaction.
    ///
    /// Used by instrumentation that knows no continuation can run
    /// anymore (connection torn down, dispatcher shutting down).
    pub(crate) fn expire_all_tokens(&self, txn: TransactionId) -> u32 {
        let Some(record) = self.resolve(txn) else {
            return 0;
        };
        let slots: Vec<Arc<TokenSlot>> = record
            .tokens
            .lock()
            .iter()
            .map(|(_, slot)| slot.clone())
            .collect();
        let mut expired = 0;
        for slot in slots {
            if self.expire_slot(txn, &record, &slot, false).0 {
                expired += 1;
            }
        }
        expired
    }

    pub(crate) fn begin_segment(
        self: &Arc<Self>,
        txn: TransactionId,
        parent: SegmentId,
        name: &str,
        kind: SegmentKind,
    ) -> Segment {
        let Some(record) = self.resolve(txn) else {
            return Segment::inert();
        };
        let opened = {
            let mut tree = record.tree.lock();
            if record.is_open() {
                tree.begin(name, kind, parent, self.clock.now())
            } else {
                None
            }
        };
        match opened {
            Some(id) => Segment::new(self.clone(), txn, id),
            None => Segment::inert(),
        }
    }

    pub(crate) fn end_segment(&self, txn: TransactionId, segment: SegmentId) -> bool {
        let Some(record) = self.resolve(txn) else {
            return false;
        };
        let (changed, finished) = {
            let mut tree = record.tree.lock();
            let changed = tree.end(segment, self.clock.now());
            let finished = if changed {
                self.maybe_finalize_locked(&record, &mut tree)
            } else {
                None
            };
            (changed, finished)
        };
        if let Some(finished) = finished {
            self.complete_finalization(txn, &record, finished);
        }
        changed
    }

    pub(crate) fn set_segment_name(
        &self,
        txn: TransactionId,
        segment: SegmentId,
        priority: NamePriority,
        replace: bool,
        name: &str,
    ) -> bool {
        self.resolve(txn).is_some_and(|record| {
            record
                .tree
                .lock()
                .set_name(segment, priority, replace, name)
        })
    }

    pub(crate) fn set_transaction_name(
        &self,
        txn: TransactionId,
        priority: NamePriority,
        replace: bool,
        category: &str,
        parts: &[&str],
    ) -> bool {
        self.resolve(txn).is_some_and(|record| {
            let composed = compose_name(category, parts);
            record.name.lock().update(priority, replace, composed)
        })
    }

    pub(crate) fn expire_root(&self, txn: TransactionId) -> bool {
        let Some(record) = self.resolve(txn) else {
            return false;
        };
        if !record.release_root() {
            return false;
        }
        let finished = {
            let mut tree = record.tree.lock();
            record.ref_count.fetch_sub(1, Ordering::SeqCst);
            self.maybe_finalize_locked(&record, &mut tree)
        };
        debug!(txn = %txn, "root hold released");
        if let Some(finished) = finished {
            self.complete_finalization(txn, &record, finished);
        }
        true
    }

    pub(crate) fn register_activity(&self, txn: TransactionId, key: ActivityKey) -> bool {
        let Some(record) = self.resolve(txn) else {
            return false;
        };
        if !record.is_open() {
            return false;
        }
        if self.activities.register(key, txn) {
            record.activity_keys.lock().push(key);
            debug!(txn = %txn, key = %key, "async activity registered");
            true
        } else {
            false
        }
    }

    fn start_async_activity(self: &Arc<Self>, key: ActivityKey) -> Option<Transaction> {
        let txn = self.activities.start(key)?;
        if self.resolve(txn).is_some() {
            debug!(txn = %txn, key = %key, "async activity claimed");
            Some(Transaction::new(self.clone(), txn))
        } else {
            None
        }
    }

    pub(crate) fn accept_headers(
        &self,
        txn: TransactionId,
        transport: TransportType,
        headers: &dyn InboundHeaders,
    ) -> bool {
        let Some(record) = self.resolve(txn) else {
            return false;
        };
        let Some(value) = headers.header(TRACEPARENT_HEADER) else {
            debug!(txn = %txn, "inbound carrier has no traceparent");
            return false;
        };
        let inbound = match Traceparent::parse(&value) {
            Ok(inbound) => inbound,
            Err(err) => {
                debug!(txn = %txn, error = %err, "discarding malformed traceparent");
                return false;
            }
        };
        if !record.try_accept() {
            debug!(txn = %txn, "inbound trace context refused: already linked");
            return false;
        }
        record.trace.lock().adopt(inbound, transport);
        debug!(txn = %txn, trace = %inbound.trace_id, "inbound trace context adopted");
        true
    }

    pub(crate) fn insert_headers(
        &self,
        txn: TransactionId,
        headers: &mut dyn OutboundHeaders,
    ) -> bool {
        let Some(record) = self.resolve(txn) else {
            return false;
        };
        record.mark_inserted();
        let (outbound, guid) = {
            let trace = record.trace.lock();
            (trace.outbound(), trace.guid())
        };
        headers.set_header(TRACEPARENT_HEADER, &outbound.format());
        headers.set_header(
            TRACESTATE_HEADER,
            &format!("{TRACESTATE_ENTRY_KEY}={}", guid.to_hex()),
        );
        true
    }

    /// Checks the finalization predicate and performs the CAS.
    ///
    /// Must be called with the tree lock held; returns the frozen
    /// snapshot when this caller won the finalization.
    fn maybe_finalize_locked(
        &self,
        record: &Arc<TransactionRecord>,
        tree: &mut SegmentTree,
    ) -> Option<FinishedTransaction> {
        if record.ref_count.load(Ordering::SeqCst) != 0 {
            return None;
        }
        if !tree.root_ended() || tree.open_count() != 0 {
            return None;
        }
        if !record.mark_finalized() {
            return None;
        }
        let name = record.name.lock();
        let trace = record.trace.lock();
        Some(FinishedTransaction::collect(
            tree,
            &name,
            &trace,
            record.is_ignored(),
            record.timeout_cause(),
            record.started_at,
            self.clock.now(),
        ))
    }

    /// Tears down a finalized transaction and runs the finalizer.
    ///
    /// No locks may be held on entry; the callback is free to re-enter
    /// the engine.
    fn complete_finalization(
        &self,
        txn: TransactionId,
        record: &Arc<TransactionRecord>,
        finished: FinishedTransaction,
    ) {
        self.registry.write().remove(txn.arena_index());
        let keys = core::mem::take(&mut *record.activity_keys.lock());
        for key in keys {
            self.activities.purge(key);
        }
        EngineCounters::bump(&self.counters.transactions_finalized);
        if finished.timeout.is_some() {
            EngineCounters::bump(&self.counters.transactions_incomplete);
        }
        debug!(txn = %txn, name = %finished.name, "transaction finalized");
        self.finalizer.on_transaction_complete(finished);
    }

    fn sweep(&self) -> SweepSummary {
        let now = self.clock.now();
        let timeout_nanos =
            u64::try_from(self.config.token_timeout.as_nanos()).unwrap_or(u64::MAX);
        let records: Vec<(TransactionId, Arc<TransactionRecord>)> = self
            .registry
            .read()
            .iter()
            .map(|(index, record)| (TransactionId::from_arena(index), record.clone()))
            .collect();

        let mut summary = SweepSummary::default();
        for (txn, record) in records {
            let stale: Vec<Arc<TokenSlot>> = record
                .tokens
                .lock()
                .iter()
                .map(|(_, slot)| slot.clone())
                .filter(|slot| now.duration_since(slot.issued_at) >= timeout_nanos)
                .collect();
            for slot in stale {
                let (effect, finalized) = self.expire_slot(txn, &record, &slot, true);
                if effect {
                    summary.tokens_timed_out += 1;
                }
                if finalized {
                    summary.transactions_finalized += 1;
                }
            }

            // An unowned transaction whose segments never closed cannot
            // finalize on its own; reclaim it once it is stale.
            if record.is_open()
                && now.duration_since(record.started_at) >= timeout_nanos
                && record.ref_count.load(Ordering::SeqCst) == 0
            {
                let finished = {
                    let mut tree = record.tree.lock();
                    if record.is_open()
                        && record.ref_count.load(Ordering::SeqCst) == 0
                        && tree.open_count() > 0
                    {
                        record.set_timeout_cause(TimeoutCause::Segment);
                        summary.segments_force_closed += u64::from(tree.end_all_open(now));
                        self.maybe_finalize_locked(&record, &mut tree)
                    } else {
                        None
                    }
                };
                if let Some(finished) = finished {
                    self.complete_finalization(txn, &record, finished);
                    summary.transactions_finalized += 1;
                }
            }
        }
        if !summary.is_clean() {
            debug!(
                tokens = summary.tokens_timed_out,
                segments = summary.segments_force_closed,
                finalized = summary.transactions_finalized,
                "sweep reclaimed stale state"
            );
        }
        summary
    }
}

/// The trace engine.
///
/// Owns every live transaction and hands completed ones to the
/// configured [`Finalizer`]. Cloning is cheap and all clones share
/// state; the engine is safe to call from any thread and never blocks
/// beyond short internal critical sections.
#[derive(Clone)]
pub struct TraceEngine {
    shared: Arc<EngineShared>,
}

impl TraceEngine {
    /// Creates an engine with the default configuration.
    pub fn new(finalizer: impl Finalizer) -> Self {
        Self::builder()
            .build(finalizer)
            .expect("default configuration is valid")
    }

    /// Returns a builder for non-default configuration.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Starts a transaction: reference count 1 (the caller's implicit
    /// hold), an open root segment, a fresh trace context.
    #[must_use]
    pub fn start_transaction(&self) -> Transaction {
        self.shared.start_transaction()
    }

    /// Claims an announced async activity; first caller wins.
    ///
    /// Returns the owning transaction exactly once per key. Losing
    /// paths get `None` and are expected to decline quietly.
    #[must_use]
    pub fn start_async_activity(&self, key: ActivityKey) -> Option<Transaction> {
        self.shared.start_async_activity(key)
    }

    /// Drops an announced activity that was never claimed.
    ///
    /// Returns true if a registration was removed.
    pub fn ignore_if_unstarted_async_context(&self, key: ActivityKey) -> bool {
        self.shared.activities.ignore_if_unstarted(key)
    }

    /// Runs one reclamation pass over stale tokens and transactions.
    ///
    /// The engine does no scheduling of its own; the embedder decides
    /// the cadence and calls this, typically from its harvest loop.
    pub fn sweep(&self) -> SweepSummary {
        self.shared.sweep()
    }

    /// A point-in-time copy of the supportability counters.
    #[must_use]
    pub fn counters(&self) -> CounterSnapshot {
        self.shared.counters.snapshot()
    }

    /// Number of transactions not yet finalized.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.shared.registry.read().len()
    }

    /// Number of announced activities not yet resolved.
    #[must_use]
    pub fn pending_activities(&self) -> usize {
        self.shared.activities.len()
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }
}

impl core::fmt::Debug for TraceEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TraceEngine")
            .field("config", &self.shared.config)
            .field("active_transactions", &self.active_transactions())
            .finish()
    }
}

/// Builder for [`TraceEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn EntropySource>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            entropy: Arc::new(OsEntropy),
        }
    }
}

impl EngineBuilder {
    /// Sets the engine configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the clock (tests use [`ManualClock`](crate::types::ManualClock)).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the entropy source.
    #[must_use]
    pub fn entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    /// Validates the configuration and builds the engine.
    pub fn build(
        self,
        finalizer: impl Finalizer,
    ) -> Result<TraceEngine, crate::config::ConfigError> {
        self.config.validate()?;
        let activities = ActivityRegistry::new(self.config.activity_shards);
        Ok(TraceEngine {
            shared: Arc::new(EngineShared {
                config: self.config,
                clock: self.clock,
                entropy: self.entropy,
                finalizer: Box::new(finalizer),
                registry: RwLock::new(Arena::new()),
                activities,
                counters: EngineCounters::default(),
            }),
        })
    }
}
