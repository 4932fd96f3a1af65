//! Trace and span identifiers.

use crate::util::EntropySource;
use core::fmt;
use serde::{Serialize, Serializer};

/// A 128-bit trace identifier shared by every transaction in a
/// distributed trace.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId {
    high: u64,
    low: u64,
}

impl TraceId {
    /// The nil (zero) trace ID, invalid on the wire.
    pub const NIL: Self = Self { high: 0, low: 0 };

    /// Creates a trace ID from two 64-bit halves.
    #[must_use]
    pub const fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    /// Draws a non-nil trace ID from the entropy source.
    #[must_use]
    pub fn generate(entropy: &dyn EntropySource) -> Self {
        Self {
            high: entropy.next_u64(),
            low: entropy.next_nonzero_u64(),
        }
    }

    /// Creates a trace ID for testing.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(value: u64) -> Self {
        Self {
            high: 0,
            low: value,
        }
    }

    /// Returns true if this is the nil trace ID.
    #[must_use]
    pub const fn is_nil(self) -> bool {
        self.high == 0 && self.low == 0
    }

    /// Returns the wire format: 32 lowercase hex characters.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("{:016x}{:016x}", self.high, self.low)
    }

    /// Parses the 32-hex-character wire format.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 {
            return None;
        }
        let high = u64::from_str_radix(&s[..16], 16).ok()?;
        let low = u64::from_str_radix(&s[16..], 16).ok()?;
        Some(Self { high, low })
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({:016x}{:016x})", self.high, self.low)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.high, self.low)
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A 64-bit identity for one transaction's span within a trace.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanGuid(u64);

impl SpanGuid {
    /// The nil (zero) guid, invalid on the wire.
    pub const NIL: Self = Self(0);

    /// Creates a guid from a raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Draws a non-nil guid from the entropy source.
    #[must_use]
    pub fn generate(entropy: &dyn EntropySource) -> Self {
        Self(entropy.next_nonzero_u64())
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true if this is the nil guid.
    #[must_use]
    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// Returns the wire format: 16 lowercase hex characters.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }

    /// Parses the 16-hex-character wire format.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 16 {
            return None;
        }
        u64::from_str_radix(s, 16).ok().map(Self)
    }
}

impl fmt::Debug for SpanGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanGuid({:016x})", self.0)
    }
}

impl fmt::Display for SpanGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for SpanGuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::SeededEntropy;

    #[test]
    fn trace_id_hex_roundtrip() {
        let id = TraceId::new(0x1234_5678_9abc_def0, 0xfedc_ba98_7654_3210);
        assert_eq!(TraceId::from_hex(&id.to_hex()), Some(id));
        assert_eq!(id.to_hex().len(), 32);
    }

    #[test]
    fn trace_id_rejects_bad_hex() {
        assert!(TraceId::from_hex("").is_none());
        assert!(TraceId::from_hex("0123456789abcdef").is_none());
        assert!(TraceId::from_hex("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz").is_none());
    }

    #[test]
    fn generated_ids_are_not_nil() {
        let entropy = SeededEntropy::new(5);
        for _ in 0..16 {
            assert!(!TraceId::generate(&entropy).is_nil());
            assert!(!SpanGuid::generate(&entropy).is_nil());
        }
    }

    #[test]
    fn same_seed_same_ids() {
        let a = TraceId::generate(&SeededEntropy::new(11));
        let b = TraceId::generate(&SeededEntropy::new(11));
        assert_eq!(a, b);
    }

    #[test]
    fn span_guid_hex_roundtrip() {
        let guid = SpanGuid::new(0xdead_beef_0000_0001);
        assert_eq!(SpanGuid::from_hex(&guid.to_hex()), Some(guid));
        assert!(SpanGuid::from_hex("tooshort").is_none());
    }

    #[test]
    fn nil_detection() {
        assert!(TraceId::NIL.is_nil());
        assert!(SpanGuid::NIL.is_nil());
        assert!(!TraceId::new_for_test(1).is_nil());
        assert!(!SpanGuid::new(1).is_nil());
    }
}
