//! Token lifecycle E2E suite.
//!
//! End-to-end coverage of the refcount protocol under real thread
//! interleavings: issuance, link/expire from competing exit paths,
//! the exactly-once finalization guarantee, and the ledger property
//! relating refcount to issue/expire history.
//!
//! Cross-references:
//!   Slot transition unit tests: src/token.rs
//!   Engine orchestration tests: src/engine.rs

use proptest::collection::vec;
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracelink::{CollectingFinalizer, TraceEngine, Transaction};

fn engine_with_collector() -> (TraceEngine, Arc<CollectingFinalizer>) {
    let collector = Arc::new(CollectingFinalizer::new());
    let engine = TraceEngine::new(collector.clone());
    (engine, collector)
}

/// The scenario from the refcount protocol: three tokens plus the
/// implicit root hold; the finalizer must fire only on the very last
/// release, and exactly once.
#[test]
fn three_tokens_finalize_on_last_expire() {
    let (engine, collector) = engine_with_collector();
    let txn = engine.start_transaction();
    let t1 = txn.token();
    let t2 = txn.token();
    let t3 = txn.token();
    assert_eq!(txn.outstanding_refs(), 4);

    assert!(txn.expire_root());
    assert!(t1.expire());
    assert!(t2.expire());
    assert_eq!(txn.outstanding_refs(), 1);
    assert!(collector.is_empty(), "one token still outstanding");

    assert!(t3.expire());
    assert!(collector.is_empty(), "root segment still open");

    assert!(txn.end_root_segment());
    assert_eq!(collector.len(), 1);
    assert!(!txn.is_active());
}

#[test]
fn double_expire_decrements_once() {
    let (engine, collector) = engine_with_collector();
    let txn = engine.start_transaction();
    let token = txn.token();
    assert_eq!(txn.outstanding_refs(), 2);

    // Success path, exception path, and cancellation path all call
    // expire; only the first has an effect.
    assert!(token.expire());
    assert!(!token.expire());
    assert!(!token.expire());
    assert_eq!(txn.outstanding_refs(), 1);

    txn.end_root_segment();
    txn.expire_root();
    assert_eq!(collector.len(), 1);
}

#[test]
fn concurrent_expires_of_one_token_have_one_effect() {
    for _ in 0..50 {
        let (engine, collector) = engine_with_collector();
        let txn = engine.start_transaction();
        let token = Arc::new(txn.token());
        assert_eq!(txn.outstanding_refs(), 2);

        let effects = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let token = token.clone();
            let effects = effects.clone();
            handles.push(thread::spawn(move || {
                if token.expire() {
                    effects.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(effects.load(Ordering::SeqCst), 1);
        assert_eq!(txn.outstanding_refs(), 1);

        txn.end_root_segment();
        txn.expire_root();
        assert_eq!(collector.len(), 1);
    }
}

#[test]
fn fan_out_across_threads_finalizes_exactly_once() {
    const WORKERS: usize = 8;
    const TOKENS_PER_WORKER: usize = 16;

    let (engine, collector) = engine_with_collector();
    let txn = engine.start_transaction();

    let mut handles = Vec::new();
    for worker in 0..WORKERS {
        let mut tokens = Vec::new();
        for _ in 0..TOKENS_PER_WORKER {
            tokens.push(txn.token());
        }
        handles.push(thread::spawn(move || {
            for (i, token) in tokens.into_iter().enumerate() {
                if (worker + i) % 2 == 0 {
                    // This continuation contributes work to the trace.
                    let segment = token.link();
                    segment.end();
                    token.expire();
                } else {
                    // This continuation declines.
                    token.expire();
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(txn.outstanding_refs(), 1);
    assert!(collector.is_empty());

    txn.end_root_segment();
    txn.expire_root();
    assert_eq!(collector.len(), 1, "finalizer fired exactly once");

    let counters = engine.counters();
    assert_eq!(counters.tokens_created, (WORKERS * TOKENS_PER_WORKER) as u64);
    assert_eq!(counters.tokens_expired, (WORKERS * TOKENS_PER_WORKER) as u64);
    assert_eq!(counters.tokens_timed_out, 0);
    assert_eq!(
        counters.links_succeeded,
        (WORKERS * TOKENS_PER_WORKER / 2) as u64
    );
}

#[test]
fn link_and_expire_from_worker_thread() {
    let (engine, collector) = engine_with_collector();
    let txn = engine.start_transaction();
    let token = txn.token();

    let worker = thread::spawn(move || {
        let segment = token.link_and_expire();
        assert!(!segment.is_inert());
        segment.set_name(
            tracelink::NamePriority::Framework,
            false,
            "Framework/worker",
        );
        segment.end();
    });
    worker.join().unwrap();

    txn.end_root_segment();
    txn.expire_root();
    let finished = collector.drain().remove(0);
    assert!(
        finished
            .segments
            .iter()
            .any(|s| s.name == "Framework/worker")
    );
}

#[test]
fn tokens_issued_from_segments_parent_continuations_there() {
    let (engine, collector) = engine_with_collector();
    let txn = engine.start_transaction();
    let dispatch = txn.start_segment("dispatch");
    let token = dispatch.token();
    let dispatch_index = dispatch.id().map(|s| s.index());
    dispatch.end();

    let continuation = token.link();
    continuation.end();
    token.expire();

    txn.end_root_segment();
    txn.expire_root();
    let finished = collector.drain().remove(0);
    let continuation_summary = finished
        .segments
        .iter()
        .find(|s| s.kind == tracelink::SegmentKind::Async)
        .expect("continuation recorded");
    assert_eq!(continuation_summary.parent, dispatch_index);
}

/// Randomized interleavings of issue/expire against one transaction.
/// The ledger law: outstanding refs equal the root hold plus issued
/// minus distinctly-expired, and never go negative.
fn run_ledger_script(script: &[u8]) {
    let (engine, collector) = engine_with_collector();
    let txn = engine.start_transaction();
    let mut live: Vec<tracelink::Token> = Vec::new();
    let mut issued = 0u32;
    let mut expired = 0u32;

    for &op in script {
        match op % 3 {
            0 => {
                live.push(txn.token());
                issued += 1;
            }
            1 => {
                if !live.is_empty() {
                    let token = live.remove(op as usize % live.len());
                    assert!(token.expire());
                    expired += 1;
                }
            }
            _ => {
                // Double-expire somewhere in the middle: must not count.
                if let Some(token) = live.first() {
                    let _ = token.link();
                }
            }
        }
        assert_eq!(txn.outstanding_refs(), 1 + issued - expired);
    }

    for token in &live {
        assert!(token.expire());
        expired += 1;
    }
    assert_eq!(issued, expired);
    assert_eq!(txn.outstanding_refs(), 1);
    assert!(collector.is_empty());

    txn.end_root_segment();
    txn.expire_root();
    assert_eq!(collector.len(), 1);
}

proptest! {
    #[test]
    fn refcount_ledger_holds_for_arbitrary_scripts(script in vec(any::<u8>(), 0..64)) {
        run_ledger_script(&script);
    }
}

#[test]
fn handles_shared_across_threads_stay_inert_after_finalize(){
    let (engine, collector) = engine_with_collector();
    let txn = engine.start_transaction();
    txn.end_root_segment();
    txn.expire_root();
    assert_eq!(collector.len(), 1);

    let shared: Vec<Transaction> = (0..4).map(|_| txn.clone()).collect();
    let mut handles = Vec::new();
    for txn in shared {
        handles.push(thread::spawn(move || {
            assert!(!txn.is_active());
            assert!(txn.start_segment("late").is_inert());
            assert!(!txn.token().is_active());
            assert!(!txn.expire_root());
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    // Nothing above may have produced a second finalization.
    assert_eq!(collector.len(), 1);
}
