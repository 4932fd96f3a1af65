//! Distributed trace identity and cross-process propagation.
//!
//! Every transaction carries a [`TraceContext`]: the trace it belongs to,
//! its own span identity within that trace, and where it came from if an
//! inbound carrier linked it to an upstream caller. The engine exposes
//! accept/insert entry points over the carrier traits in [`headers`];
//! this module holds the data and the linkage rules.

pub mod headers;
pub mod id;

pub use headers::{
    HeaderParseError, InboundHeaders, MemoryHeaders, OutboundHeaders, Traceparent, TransportType,
    TRACEPARENT_HEADER, TRACESTATE_ENTRY_KEY, TRACESTATE_HEADER,
};
pub use id::{SpanGuid, TraceId};

use crate::util::EntropySource;

/// Linkage to the upstream caller recorded by an accepted inbound
/// carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ParentContext {
    /// The caller's span guid.
    pub span: SpanGuid,
    /// The transport the linkage arrived over.
    pub transport: TransportType,
}

/// A transaction's position in a distributed trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: TraceId,
    guid: SpanGuid,
    sampled: bool,
    parent: Option<ParentContext>,
}

impl TraceContext {
    /// Creates the context for a transaction starting a fresh trace.
    #[must_use]
    pub fn new_root(entropy: &dyn EntropySource) -> Self {
        Self {
            trace_id: TraceId::generate(entropy),
            guid: SpanGuid::generate(entropy),
            sampled: true,
            parent: None,
        }
    }

    /// The trace this transaction belongs to.
    #[must_use]
    pub const fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// This transaction's span identity.
    #[must_use]
    pub const fn guid(&self) -> SpanGuid {
        self.guid
    }

    /// Whether the trace is sampled.
    #[must_use]
    pub const fn sampled(&self) -> bool {
        self.sampled
    }

    /// Upstream linkage, if an inbound carrier was accepted.
    #[must_use]
    pub const fn parent(&self) -> Option<ParentContext> {
        self.parent
    }

    /// Adopts an upstream caller's trace.
    ///
    /// The transaction keeps its own guid but joins the caller's trace
    /// and inherits the caller's sampling decision.
    pub(crate) fn adopt(&mut self, inbound: Traceparent, transport: TransportType) {
        self.trace_id = inbound.trace_id;
        self.sampled = inbound.sampled;
        self.parent = Some(ParentContext {
            span: inbound.parent_span,
            transport,
        });
    }

    /// Builds the `traceparent` payload describing this transaction to a
    /// downstream callee.
    #[must_use]
    pub(crate) const fn outbound(&self) -> Traceparent {
        Traceparent {
            trace_id: self.trace_id,
            parent_span: self.guid,
            sampled: self.sampled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::SeededEntropy;

    #[test]
    fn root_context_has_no_parent() {
        let ctx = TraceContext::new_root(&SeededEntropy::new(1));
        assert!(ctx.parent().is_none());
        assert!(ctx.sampled());
        assert!(!ctx.trace_id().is_nil());
        assert!(!ctx.guid().is_nil());
    }

    #[test]
    fn adopt_joins_callers_trace_and_keeps_guid() {
        let mut ctx = TraceContext::new_root(&SeededEntropy::new(2));
        let own_guid = ctx.guid();
        let inbound = Traceparent {
            trace_id: TraceId::new_for_test(77),
            parent_span: SpanGuid::new(42),
            sampled: false,
        };
        ctx.adopt(inbound, TransportType::Http);
        assert_eq!(ctx.trace_id(), TraceId::new_for_test(77));
        assert_eq!(ctx.guid(), own_guid);
        assert!(!ctx.sampled());
        let parent = ctx.parent().unwrap();
        assert_eq!(parent.span, SpanGuid::new(42));
        assert_eq!(parent.transport, TransportType::Http);
    }

    #[test]
    fn outbound_names_self_as_parent() {
        let ctx = TraceContext::new_root(&SeededEntropy::new(3));
        let outbound = ctx.outbound();
        assert_eq!(outbound.trace_id, ctx.trace_id());
        assert_eq!(outbound.parent_span, ctx.guid());
        assert_eq!(outbound.sampled, ctx.sampled());
    }
}
