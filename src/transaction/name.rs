//! Priority-governed naming.
//!
//! A transaction and each of its segments carry one mutable name. Every
//! assignment states the rank it can justify; the current name changes
//! only when the incoming rank beats the recorded one. This is what lets
//! layered instrumentation run in any order without a generic name
//! clobbering a more specific one.

use crate::types::NamePriority;
use core::fmt;

/// Placeholder used until any name is assigned.
pub const UNKNOWN_NAME: &str = "Unknown";

/// A name paired with the priority that set it.
///
/// The update law: an assignment at priority `p` with flag `replace`
/// takes effect iff `p > current`, or `p == current && replace`.
/// Everything else is a silent no-op, by design, so losing callers need
/// no special handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityName {
    value: Option<String>,
    priority: NamePriority,
}

impl Default for PriorityName {
    fn default() -> Self {
        Self::unset()
    }
}

impl PriorityName {
    /// Creates an unset name (renders as [`UNKNOWN_NAME`]).
    #[must_use]
    pub const fn unset() -> Self {
        Self {
            value: None,
            priority: NamePriority::None,
        }
    }

    /// Creates a name already assigned at the given priority.
    #[must_use]
    pub fn assigned(priority: NamePriority, value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            priority,
        }
    }

    /// Returns the current name, or [`UNKNOWN_NAME`] if none was set.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.value.as_deref().unwrap_or(UNKNOWN_NAME)
    }

    /// Returns the priority of the current name.
    #[must_use]
    pub const fn priority(&self) -> NamePriority {
        self.priority
    }

    /// Returns true if a name has been assigned.
    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.value.is_some()
    }

    /// Applies the update law; returns true if the name changed.
    pub fn update(
        &mut self,
        priority: NamePriority,
        replace: bool,
        value: impl Into<String>,
    ) -> bool {
        let wins = priority > self.priority || (priority == self.priority && replace);
        if wins {
            self.value = Some(value.into());
            self.priority = priority;
        }
        wins
    }
}

impl fmt::Display for PriorityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Joins a category and name parts into a single path-style name.
///
/// Empty parts are skipped so callers can pass optional components
/// without pre-filtering.
#[must_use]
pub fn compose_name(category: &str, parts: &[&str]) -> String {
    let mut name = String::from(category);
    for part in parts {
        if part.is_empty() {
            continue;
        }
        if !name.is_empty() {
            name.push('/');
        }
        name.push_str(part);
    }
    if name.is_empty() {
        UNKNOWN_NAME.to_string()
    } else {
        name
    }
}
