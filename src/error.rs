//! Crate-level error type.
//!
//! The instrumentation path is infallible by construction: unavailable
//! tracing surfaces as inert objects, losing races as `false`/`None`.
//! Errors exist only on the embedder-facing surface, where they are
//! worth acting on: configuration validation and header parsing.

use crate::config::ConfigError;
use crate::distributed::HeaderParseError;

/// Any error the crate can surface to an embedder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The engine configuration was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// An inbound trace header could not be parsed.
    #[error(transparent)]
    HeaderParse(#[from] HeaderParseError),
}

/// Convenience alias for results with [`Error`].
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_convert_and_display() {
        let err: Error = ConfigError::ZeroActivityShards.into();
        assert_eq!(err.to_string(), "activity_shards must be at least 1");

        let err: Error = HeaderParseError::Missing.into();
        assert_eq!(err.to_string(), "traceparent header is missing");
    }
}
