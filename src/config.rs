//! Engine configuration.

use core::fmt;
use std::time::Duration;

/// Default age after which an unexpired token is force-expired by the sweep.
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(180);

/// Default shard count for the async activity registry.
pub const DEFAULT_ACTIVITY_SHARDS: usize = 16;

/// Default cap on segments recorded per transaction.
///
/// Beyond the cap, segment starts return inert handles; the trace is
/// truncated rather than unbounded.
pub const DEFAULT_SEGMENT_LIMIT: usize = 3_000;

/// Configuration error produced by [`EngineConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The activity registry shard count must be non-zero.
    #[error("activity_shards must be at least 1")]
    ZeroActivityShards,
    /// The segment limit must admit at least the root segment.
    #[error("segment_limit must be at least 1")]
    ZeroSegmentLimit,
    /// A zero token timeout would expire every token at the first sweep.
    #[error("token_timeout must be non-zero")]
    ZeroTokenTimeout,
}

/// Tunable parameters for a [`TraceEngine`](crate::TraceEngine).
///
/// ```
/// use std::time::Duration;
/// use tracelink::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_token_timeout(Duration::from_secs(30))
///     .with_segment_limit(500);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct EngineConfig {
    /// Age after which the sweep force-expires an outstanding token.
    pub token_timeout: Duration,
    /// Shard count for the async activity registry.
    pub activity_shards: usize,
    /// Maximum number of segments recorded per transaction.
    pub segment_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            token_timeout: DEFAULT_TOKEN_TIMEOUT,
            activity_shards: DEFAULT_ACTIVITY_SHARDS,
            segment_limit: DEFAULT_SEGMENT_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Sets the token timeout.
    #[must_use]
    pub const fn with_token_timeout(mut self, timeout: Duration) -> Self {
        self.token_timeout = timeout;
        self
    }

    /// Sets the activity registry shard count.
    #[must_use]
    pub const fn with_activity_shards(mut self, shards: usize) -> Self {
        self.activity_shards = shards;
        self
    }

    /// Sets the per-transaction segment cap.
    #[must_use]
    pub const fn with_segment_limit(mut self, limit: usize) -> Self {
        self.segment_limit = limit;
        self
    }

    /// Checks the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.activity_shards == 0 {
            return Err(ConfigError::ZeroActivityShards);
        }
        if self.segment_limit == 0 {
            return Err(ConfigError::ZeroSegmentLimit);
        }
        if self.token_timeout.is_zero() {
            return Err(ConfigError::ZeroTokenTimeout);
        }
        Ok(())
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("token_timeout", &self.token_timeout)
            .field("activity_shards", &self.activity_shards)
            .field("segment_limit", &self.segment_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_values_are_rejected() {
        let config = EngineConfig::default().with_activity_shards(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroActivityShards));

        let config = EngineConfig::default().with_segment_limit(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroSegmentLimit));

        let config = EngineConfig::default().with_token_timeout(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroTokenTimeout));
    }

    #[test]
    fn builder_sets_fields() {
        let config = EngineConfig::default()
            .with_token_timeout(Duration::from_secs(5))
            .with_activity_shards(4)
            .with_segment_limit(10);
        assert_eq!(config.token_timeout, Duration::from_secs(5));
        assert_eq!(config.activity_shards, 4);
        assert_eq!(config.segment_limit, 10);
    }
}
