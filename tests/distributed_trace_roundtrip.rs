//! Distributed trace propagation suite.
//!
//! Round-trips trace context through the header carrier boundary:
//! outbound insert on the caller, inbound accept on the callee, causal
//! linkage across one or more hops, and the accept gate rules.
//!
//! Cross-references:
//!   Codec unit tests:   src/distributed/headers.rs
//!   Context unit tests: src/distributed/mod.rs

use std::sync::Arc;
use tracelink::{
    CollectingFinalizer, InboundHeaders, MemoryHeaders, OutboundHeaders, TraceEngine, Transaction,
    TransportType,
};

fn engine_with_collector() -> (TraceEngine, Arc<CollectingFinalizer>) {
    let collector = Arc::new(CollectingFinalizer::new());
    let engine = TraceEngine::new(collector.clone());
    (engine, collector)
}

fn finish(txn: &Transaction) {
    txn.end_root_segment();
    txn.expire_root();
}

#[test]
fn callee_joins_callers_trace() {
    let (engine, collector) = engine_with_collector();

    let caller = engine.start_transaction();
    let mut carrier = MemoryHeaders::new(TransportType::Http);
    assert!(caller.insert_distributed_trace_headers(&mut carrier));
    assert!(carrier.header("traceparent").is_some());
    assert!(
        carrier
            .header("tracestate")
            .is_some_and(|v| v.starts_with("tracelink="))
    );

    let callee = engine.start_transaction();
    assert!(callee.accept_distributed_trace_headers(TransportType::Http, &carrier));
    assert_eq!(callee.trace_id(), caller.trace_id());

    finish(&caller);
    finish(&callee);

    let finished = collector.drain();
    let caller_summary = finished.iter().find(|t| t.parent.is_none()).unwrap();
    let callee_summary = finished.iter().find(|t| t.parent.is_some()).unwrap();
    assert_eq!(caller_summary.trace_id, callee_summary.trace_id);
    let parent = callee_summary.parent.unwrap();
    assert_eq!(parent.span, caller_summary.guid);
    assert_eq!(parent.transport, TransportType::Http);
}

#[test]
fn trace_id_survives_multiple_hops() {
    let (engine, collector) = engine_with_collector();

    let service_a = engine.start_transaction();
    let origin = service_a.trace_id().unwrap();

    let mut hop1 = MemoryHeaders::new(TransportType::Http);
    service_a.insert_distributed_trace_headers(&mut hop1);

    let service_b = engine.start_transaction();
    service_b.accept_distributed_trace_headers(TransportType::Http, &hop1);

    let mut hop2 = MemoryHeaders::new(TransportType::Message);
    service_b.insert_distributed_trace_headers(&mut hop2);

    let service_c = engine.start_transaction();
    service_c.accept_distributed_trace_headers(TransportType::Message, &hop2);

    assert_eq!(service_c.trace_id(), Some(origin));

    finish(&service_a);
    finish(&service_b);
    finish(&service_c);

    let finished = collector.drain();
    assert!(finished.iter().all(|t| t.trace_id == origin));
    // B's parent is A; C's parent is B.
    let b = finished
        .iter()
        .find(|t| t.parent.map(|p| p.transport) == Some(TransportType::Http))
        .unwrap();
    let c = finished
        .iter()
        .find(|t| t.parent.map(|p| p.transport) == Some(TransportType::Message))
        .unwrap();
    let a = finished.iter().find(|t| t.parent.is_none()).unwrap();
    assert_eq!(b.parent.unwrap().span, a.guid);
    assert_eq!(c.parent.unwrap().span, b.guid);
}

#[test]
fn accept_is_single_shot() {
    let (engine, _collector) = engine_with_collector();

    let first_caller = engine.start_transaction();
    let mut first = MemoryHeaders::new(TransportType::Http);
    first_caller.insert_distributed_trace_headers(&mut first);

    let second_caller = engine.start_transaction();
    let mut second = MemoryHeaders::new(TransportType::Http);
    second_caller.insert_distributed_trace_headers(&mut second);

    let callee = engine.start_transaction();
    assert!(callee.accept_distributed_trace_headers(TransportType::Http, &first));
    assert!(!callee.accept_distributed_trace_headers(TransportType::Http, &second));
    assert_eq!(callee.trace_id(), first_caller.trace_id());
}

#[test]
fn accept_after_insert_is_refused() {
    let (engine, _collector) = engine_with_collector();

    let txn = engine.start_transaction();
    let own_trace = txn.trace_id();
    let mut outbound = MemoryHeaders::new(TransportType::Http);
    txn.insert_distributed_trace_headers(&mut outbound);

    let upstream = engine.start_transaction();
    let mut inbound = MemoryHeaders::new(TransportType::Http);
    upstream.insert_distributed_trace_headers(&mut inbound);

    assert!(!txn.accept_distributed_trace_headers(TransportType::Http, &inbound));
    assert_eq!(txn.trace_id(), own_trace);
}

#[test]
fn missing_or_malformed_headers_never_break_the_caller() {
    let (engine, _collector) = engine_with_collector();
    let txn = engine.start_transaction();
    let own_trace = txn.trace_id();

    let empty = MemoryHeaders::new(TransportType::Http);
    assert!(!txn.accept_distributed_trace_headers(TransportType::Http, &empty));

    let mut junk = MemoryHeaders::new(TransportType::Http);
    junk.set_header("traceparent", "00-not-a-real-header");
    assert!(!txn.accept_distributed_trace_headers(TransportType::Http, &junk));

    let mut nil_trace = MemoryHeaders::new(TransportType::Http);
    nil_trace.set_header(
        "traceparent",
        "00-00000000000000000000000000000000-0000000000000001-01",
    );
    assert!(!txn.accept_distributed_trace_headers(TransportType::Http, &nil_trace));

    assert_eq!(txn.trace_id(), own_trace);
    // A later valid accept still works: the gate only closes on success
    // or on outbound insert.
    let upstream = engine.start_transaction();
    let mut good = MemoryHeaders::new(TransportType::Http);
    upstream.insert_distributed_trace_headers(&mut good);
    assert!(txn.accept_distributed_trace_headers(TransportType::Http, &good));
}

#[test]
fn insert_on_finished_transaction_is_inert() {
    let (engine, collector) = engine_with_collector();
    let txn = engine.start_transaction();
    finish(&txn);
    assert_eq!(collector.len(), 1);

    let mut carrier = MemoryHeaders::new(TransportType::Http);
    assert!(!txn.insert_distributed_trace_headers(&mut carrier));
    assert!(carrier.entries().is_empty());
    assert!(!txn.accept_distributed_trace_headers(TransportType::Http, &carrier));
}

#[test]
fn sampling_decision_propagates_downstream() {
    let (engine, collector) = engine_with_collector();

    let caller = engine.start_transaction();
    let mut carrier = MemoryHeaders::new(TransportType::Http);
    caller.insert_distributed_trace_headers(&mut carrier);
    let header = carrier.header("traceparent").unwrap();
    assert!(header.ends_with("-01"), "fresh roots are sampled: {header}");

    let callee = engine.start_transaction();
    callee.accept_distributed_trace_headers(TransportType::Http, &carrier);

    finish(&caller);
    finish(&callee);
    assert!(collector.drain().iter().all(|t| t.sampled));
}
