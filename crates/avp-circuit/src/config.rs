use crate::error::CircuitError;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Upper bound on any cooldown (ten years)
const MAX_COOLDOWN_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive failures that trip a Closed circuit
    pub consecutive_failure_limit: u32,
    /// Observations required before the accuracy path may trip
    pub min_observations_for_trip: u64,
    /// Accuracy below which a Closed circuit trips
    pub accuracy_threshold: f64,
    /// Time an Open circuit waits before probing
    pub cooldown_secs: u64,
    /// Clean observations required to close a HalfOpen circuit
    pub half_open_test_count: u32,
    /// Trip reasons retained per source
    pub trip_reason_capacity: usize,
}

impl CircuitConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With consecutive failure limit
    #[inline]
    #[must_use]
    pub fn with_consecutive_failure_limit(mut self, limit: u32) -> Self {
        self.consecutive_failure_limit = limit;
        self
    }

    /// With accuracy trip parameters
    #[inline]
    #[must_use]
    pub fn with_accuracy_trip(mut self, min_observations: u64, threshold: f64) -> Self {
        self.min_observations_for_trip = min_observations;
        self.accuracy_threshold = threshold;
        self
    }

    /// With cooldown
    #[inline]
    #[must_use]
    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    /// With half-open trial count
    #[inline]
    #[must_use]
    pub fn with_half_open_test_count(mut self, count: u32) -> Self {
        self.half_open_test_count = count;
        self
    }

    /// Cooldown as a duration
    #[inline]
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        let secs = i64::try_from(self.cooldown_secs).unwrap_or(MAX_COOLDOWN_SECS);
        Duration::seconds(secs.min(MAX_COOLDOWN_SECS))
    }

    /// Validate configuration
    ///
    /// # Errors
    /// Returns `CircuitError::InvalidConfig` naming the first bad field
    pub fn validate(&self) -> Result<(), CircuitError> {
        if self.consecutive_failure_limit == 0 {
            return Err(CircuitError::InvalidConfig(
                "consecutive_failure_limit must be at least 1".into(),
            ));
        }
        if self.min_observations_for_trip == 0 {
            return Err(CircuitError::InvalidConfig(
                "min_observations_for_trip must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.accuracy_threshold) {
            return Err(CircuitError::InvalidConfig(format!(
                "accuracy_threshold must be within [0, 1], got {}",
                self.accuracy_threshold
            )));
        }
        if self.half_open_test_count == 0 {
            return Err(CircuitError::InvalidConfig(
                "half_open_test_count must be at least 1".into(),
            ));
        }
        if self.trip_reason_capacity == 0 {
            return Err(CircuitError::InvalidConfig(
                "trip_reason_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            consecutive_failure_limit: 5,
            min_observations_for_trip: 10,
            accuracy_threshold: 0.50,
            cooldown_secs: 60 * 60,
            half_open_test_count: 3,
            trip_reason_capacity: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CircuitConfig::default();
        assert_eq!(config.consecutive_failure_limit, 5);
        assert_eq!(config.min_observations_for_trip, 10);
        assert_eq!(config.cooldown(), Duration::minutes(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_limits() {
        assert!(CircuitConfig::new()
            .with_consecutive_failure_limit(0)
            .validate()
            .is_err());
        assert!(CircuitConfig::new()
            .with_half_open_test_count(0)
            .validate()
            .is_err());
    }

    #[test]
    fn rejects_out_of_range_accuracy() {
        let config = CircuitConfig::new().with_accuracy_trip(10, 1.5);
        assert!(matches!(config.validate(), Err(CircuitError::InvalidConfig(_))));
    }

    #[test]
    fn partial_table_uses_defaults() {
        let config: CircuitConfig =
            serde_json::from_str(r#"{ "cooldown_secs": 120 }"#).unwrap();
        assert_eq!(config.cooldown_secs, 120);
        assert_eq!(config.half_open_test_count, 3);
    }
}
