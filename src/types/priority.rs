//! Naming priority ranks.
//!
//! A transaction (and each segment) carries one mutable name governed by
//! a total priority order. Layered instrumentation sets names at the rank
//! it can justify: an inner framework hook must not clobber a name the
//! application set explicitly, and nothing may clobber anything with the
//! fallback rank.

use serde::Serialize;

/// Rank of a name assignment, lowest to highest.
///
/// The derived `Ord` is the authority: a later assignment wins only if
/// its rank is strictly higher, or equal with the caller asking to
/// replace. See `PriorityName::update` for the exact law.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub enum NamePriority {
    /// No name has been assigned; the placeholder rank of `"Unknown"`.
    #[default]
    None,
    /// Derived mechanically from the request (URI, queue name).
    Request,
    /// Inferred by low-confidence framework instrumentation.
    FrameworkLow,
    /// Inferred by framework instrumentation.
    Framework,
    /// Inferred by high-confidence framework instrumentation.
    FrameworkHigh,
    /// Set explicitly by application code.
    Custom,
    /// Set explicitly by application code, overriding other custom names.
    CustomHigh,
}

impl NamePriority {
    /// Returns a short label for diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Request => "request",
            Self::FrameworkLow => "framework_low",
            Self::Framework => "framework",
            Self::FrameworkHigh => "framework_high",
            Self::Custom => "custom",
            Self::CustomHigh => "custom_high",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_is_total() {
        let ranks = [
            NamePriority::None,
            NamePriority::Request,
            NamePriority::FrameworkLow,
            NamePriority::Framework,
            NamePriority::FrameworkHigh,
            NamePriority::Custom,
            NamePriority::CustomHigh,
        ];
        for window in ranks.windows(2) {
            assert!(window[0] < window[1], "{:?} !< {:?}", window[0], window[1]);
        }
    }

    #[test]
    fn default_is_lowest() {
        assert_eq!(NamePriority::default(), NamePriority::None);
        assert!(NamePriority::None < NamePriority::Request);
    }
}
