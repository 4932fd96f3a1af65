//! Tracelink: token-based asynchronous transaction tracing core.
//!
//! # Overview
//!
//! Tracelink tracks one logical unit of work (a transaction) as it hops
//! across threads, pools, callbacks, and suspensions, and attributes all
//! of that work to one trace. A transaction is exactly owned by its live
//! tokens plus the implicit hold its initiating context holds; it is
//! handed to the finalizer the moment the last hold is released and its
//! segment tree is closed, never earlier and never twice.
//!
//! # Core Guarantees
//!
//! - **No premature finalization**: a transaction completes only when its
//!   reference count is zero and every segment has ended
//! - **Single-effect resolution**: `expire` on a token and `end` on a
//!   segment take effect exactly once, no matter how many exit paths call them
//! - **Deterministic race resolution**: competing continuations of one
//!   announced activity resolve first-claim-wins
//! - **No ambient authority**: attribution flows through explicit handles
//!   and tokens, not thread-locals
//! - **Inert degradation**: operations on a finished transaction return
//!   no-op objects, so instrumented code never branches on availability
//! - **Bounded leaks**: an embedder-driven sweep force-expires abandoned
//!   tokens and completes stale transactions as incomplete
//!
//! # Module Structure
//!
//! - [`types`]: Core types (identifiers, time, naming priorities)
//! - [`engine`]: The trace engine: registry, lifecycle, sweep
//! - [`transaction`]: Transaction state and the public handle
//! - [`token`]: Token lifecycle across concurrency boundaries
//! - [`segment`]: Append-only segment trees
//! - [`distributed`]: Trace identity and cross-process header propagation
//! - [`report`]: Finished-transaction snapshots and the finalizer boundary
//! - [`supportability`]: Engine health counters
//! - [`config`]: Engine configuration
//! - [`error`]: Error types
//! - [`util`]: Internal utilities (arena, entropy)
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tracelink::{CollectingFinalizer, TraceEngine};
//!
//! let harvest = Arc::new(CollectingFinalizer::new());
//! let engine = TraceEngine::new(harvest.clone());
//!
//! let txn = engine.start_transaction();
//! let token = txn.token();
//!
//! // ... hand `token` to another thread ...
//! let continuation = token.link();
//! continuation.end();
//! token.expire();
//!
//! txn.end_root_segment();
//! txn.expire_root();
//! assert_eq!(harvest.drain().len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

mod activity;
pub mod config;
pub mod distributed;
pub mod engine;
pub mod error;
pub mod report;
pub mod segment;
pub mod supportability;
pub mod token;
pub mod tracing_compat;
pub mod transaction;
pub mod types;
pub mod util;

// Re-exports for convenient access to core types
pub use config::{
    ConfigError, EngineConfig, DEFAULT_ACTIVITY_SHARDS, DEFAULT_SEGMENT_LIMIT,
    DEFAULT_TOKEN_TIMEOUT,
};
pub use distributed::{
    HeaderParseError, InboundHeaders, MemoryHeaders, OutboundHeaders, ParentContext, SpanGuid,
    TraceContext, TraceId, Traceparent, TransportType,
};
pub use engine::{EngineBuilder, SweepSummary, TraceEngine};
pub use error::{Error, Result};
pub use report::{
    finalizer_fn, CollectingFinalizer, FinalizerFn, Finalizer, FinishedTransaction,
    SegmentSummary, TimeoutCause,
};
pub use segment::{Segment, SegmentKind};
pub use supportability::CounterSnapshot;
pub use token::{Token, TokenState};
pub use transaction::name::{compose_name, PriorityName, UNKNOWN_NAME};
pub use transaction::Transaction;
pub use types::{
    ActivityKey, Clock, ManualClock, NamePriority, SegmentId, SystemClock, Time, TransactionId,
};
