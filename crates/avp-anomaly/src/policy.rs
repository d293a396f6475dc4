use crate::error::AnomalyError;
use avp_common::SeverityTier;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Occurrence-count thresholds for each severity tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationPolicy {
    /// First count at MEDIUM
    pub medium_at: u64,
    /// First count at HIGH
    pub high_at: u64,
    /// First count at CRITICAL; reaching it triggers the external escalation
    pub critical_at: u64,
    /// Upper bound on a single lesson or alert delivery
    pub delivery_timeout_ms: u64,
}

impl EscalationPolicy {
    /// Create default policy
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With tier thresholds
    #[inline]
    #[must_use]
    pub fn with_thresholds(mut self, medium_at: u64, high_at: u64, critical_at: u64) -> Self {
        self.medium_at = medium_at;
        self.high_at = high_at;
        self.critical_at = critical_at;
        self
    }

    /// With delivery timeout
    #[inline]
    #[must_use]
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Delivery timeout as a duration
    #[inline]
    #[must_use]
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    /// Tier for a cumulative occurrence count
    #[must_use]
    pub fn tier_for(&self, occurrences: u64) -> SeverityTier {
        if occurrences >= self.critical_at {
            SeverityTier::Critical
        } else if occurrences >= self.high_at {
            SeverityTier::High
        } else if occurrences >= self.medium_at {
            SeverityTier::Medium
        } else {
            SeverityTier::Low
        }
    }

    /// Validate policy
    ///
    /// # Errors
    /// Returns `AnomalyError::InvalidPolicy` unless
    /// `1 < medium_at < high_at < critical_at` and the timeout is positive
    pub fn validate(&self) -> Result<(), AnomalyError> {
        if !(1 < self.medium_at && self.medium_at < self.high_at && self.high_at < self.critical_at)
        {
            return Err(AnomalyError::InvalidPolicy(format!(
                "thresholds must satisfy 1 < medium_at < high_at < critical_at, got {}/{}/{}",
                self.medium_at, self.high_at, self.critical_at
            )));
        }
        if self.delivery_timeout_ms == 0 {
            return Err(AnomalyError::InvalidPolicy(
                "delivery_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            medium_at: 3,
            high_at: 5,
            critical_at: 7,
            delivery_timeout_ms: 5_000,
        }
    }
}
