//! Header carrier traits and the W3C trace context codec.
//!
//! The engine never touches a concrete HTTP or messaging library. Callers
//! wrapping an outbound call hand in an [`OutboundHeaders`] capability;
//! callers unwrapping an inbound request hand in [`InboundHeaders`]. One
//! codec per transport variant, not per library.

use super::id::{SpanGuid, TraceId};
use core::fmt;

/// Name of the W3C trace context header.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Name of the W3C trace state header.
pub const TRACESTATE_HEADER: &str = "tracestate";

/// Key under which the transaction guid rides in `tracestate`.
pub const TRACESTATE_ENTRY_KEY: &str = "tracelink";

/// The transport a header carrier speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    /// HTTP request/response headers.
    Http,
    /// Message/queue properties.
    Message,
    /// Anything else capable of carrying key-value pairs.
    Other,
}

impl TransportType {
    /// Returns a short label for diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Message => "message",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read capability over inbound carrier headers.
pub trait InboundHeaders {
    /// The transport this carrier speaks.
    fn transport_type(&self) -> TransportType;

    /// Returns the value of the named header, if present.
    fn header(&self, name: &str) -> Option<String>;
}

/// Write capability over outbound carrier headers.
pub trait OutboundHeaders {
    /// The transport this carrier speaks.
    fn transport_type(&self) -> TransportType;

    /// Sets a header, replacing any previous value.
    fn set_header(&mut self, name: &str, value: &str);
}

/// Why an inbound `traceparent` header failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderParseError {
    /// The carrier had no `traceparent` header.
    #[error("traceparent header is missing")]
    Missing,
    /// The header did not have the four dash-separated fields.
    #[error("traceparent has {0} fields, expected 4")]
    FieldCount(usize),
    /// The version field was malformed or the reserved `ff`.
    #[error("unsupported traceparent version {0:?}")]
    Version(String),
    /// The trace id field was malformed or all-zero.
    #[error("invalid traceparent trace id")]
    TraceId,
    /// The parent id field was malformed or all-zero.
    #[error("invalid traceparent parent id")]
    ParentId,
    /// The flags field was malformed.
    #[error("invalid traceparent flags")]
    Flags,
}

/// A parsed `traceparent` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Traceparent {
    /// The trace the caller belongs to.
    pub trace_id: TraceId,
    /// The caller's span identity.
    pub parent_span: SpanGuid,
    /// Whether the caller sampled this trace.
    pub sampled: bool,
}

impl Traceparent {
    /// Parses the W3C format `{version}-{trace-id}-{parent-id}-{flags}`.
    ///
    /// Versions other than the reserved `ff` are accepted; fields beyond
    /// the first four are ignored, per the W3C forward-compatibility
    /// rule.
    pub fn parse(value: &str) -> Result<Self, HeaderParseError> {
        let fields: Vec<&str> = value.trim().split('-').collect();
        if fields.len() < 4 {
            return Err(HeaderParseError::FieldCount(fields.len()));
        }
        let version = fields[0];
        if version.len() != 2
            || !version.bytes().all(|b| b.is_ascii_hexdigit())
            || version.eq_ignore_ascii_case("ff")
        {
            return Err(HeaderParseError::Version(version.to_string()));
        }
        let trace_id =
            TraceId::from_hex(fields[1]).ok_or(HeaderParseError::TraceId)?;
        if trace_id.is_nil() {
            return Err(HeaderParseError::TraceId);
        }
        let parent_span =
            SpanGuid::from_hex(fields[2]).ok_or(HeaderParseError::ParentId)?;
        if parent_span.is_nil() {
            return Err(HeaderParseError::ParentId);
        }
        let flags = fields[3];
        if flags.len() != 2 || !flags.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HeaderParseError::Flags);
        }
        let sampled = u8::from_str_radix(flags, 16).map_err(|_| HeaderParseError::Flags)? & 0x01
            != 0;
        Ok(Self {
            trace_id,
            parent_span,
            sampled,
        })
    }

    /// Formats the header value.
    #[must_use]
    pub fn format(&self) -> String {
        format!(
            "00-{}-{}-{:02x}",
            self.trace_id.to_hex(),
            self.parent_span.to_hex(),
            u8::from(self.sampled)
        )
    }
}

/// In-memory header carrier for tests and non-networked embedders.
#[derive(Debug, Default, Clone)]
pub struct MemoryHeaders {
    transport: Option<TransportType>,
    entries: Vec<(String, String)>,
}

impl MemoryHeaders {
    /// Creates an empty carrier for the given transport.
    #[must_use]
    pub fn new(transport: TransportType) -> Self {
        Self {
            transport: Some(transport),
            entries: Vec::new(),
        }
    }

    /// Returns all entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }
}

impl InboundHeaders for MemoryHeaders {
    fn transport_type(&self) -> TransportType {
        self.transport.unwrap_or(TransportType::Other)
    }

    fn header(&self, name: &str) -> Option<String> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }
}

impl OutboundHeaders for MemoryHeaders {
    fn transport_type(&self) -> TransportType {
        self.transport.unwrap_or(TransportType::Other)
    }

    fn set_header(&mut self, name: &str, value: &str) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            entry.1 = value.to_string();
        } else {
            self.entries.push((name.to_string(), value.to_string()));
        }
    }
}
