use crate::error::AggregatorError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Aggregation thresholds and execution limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Scores below this are approved outright
    pub warn_threshold: f64,
    /// Scores at or above this are blocked
    pub block_threshold: f64,
    /// Hard per-check timeout
    pub check_timeout_ms: u64,
    /// Concurrent checks; `None` runs every enabled check at once
    pub max_parallel_checks: Option<usize>,
    /// Score used when no check is enabled
    pub empty_set_score: f64,
}

impl AggregatorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With decision thresholds
    #[inline]
    #[must_use]
    pub fn with_thresholds(mut self, warn: f64, block: f64) -> Self {
        self.warn_threshold = warn;
        self.block_threshold = block;
        self
    }

    /// With per-check timeout
    #[inline]
    #[must_use]
    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With a concurrency limit
    #[inline]
    #[must_use]
    pub fn with_max_parallel_checks(mut self, max: usize) -> Self {
        self.max_parallel_checks = Some(max);
        self
    }

    /// Per-check timeout as a duration
    #[inline]
    #[must_use]
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    /// Validate configuration
    ///
    /// # Errors
    /// Returns `AggregatorError::InvalidConfig` if thresholds are out of order
    /// or outside `[0, 100]`, or a limit is zero
    pub fn validate(&self) -> Result<(), AggregatorError> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(self.warn_threshold) || !in_range(self.block_threshold) {
            return Err(AggregatorError::InvalidConfig(
                "thresholds must be within [0, 100]".into(),
            ));
        }
        if self.warn_threshold > self.block_threshold {
            return Err(AggregatorError::InvalidConfig(format!(
                "warn_threshold {} exceeds block_threshold {}",
                self.warn_threshold, self.block_threshold
            )));
        }
        if !in_range(self.empty_set_score) {
            return Err(AggregatorError::InvalidConfig(
                "empty_set_score must be within [0, 100]".into(),
            ));
        }
        if self.check_timeout_ms == 0 {
            return Err(AggregatorError::InvalidConfig(
                "check_timeout_ms must be positive".into(),
            ));
        }
        if self.max_parallel_checks == Some(0) {
            return Err(AggregatorError::InvalidConfig(
                "max_parallel_checks must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            warn_threshold: 30.0,
            block_threshold: 60.0,
            check_timeout_ms: 2_000,
            max_parallel_checks: None,
            empty_set_score: 50.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AggregatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.check_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let config = AggregatorConfig::new().with_thresholds(70.0, 40.0);
        assert!(matches!(
            config.validate(),
            Err(AggregatorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let config = AggregatorConfig::new().with_thresholds(30.0, 120.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_parallelism_rejected() {
        let config = AggregatorConfig::new().with_max_parallel_checks(0);
        assert!(config.validate().is_err());
    }
}
