use crate::check::RiskCheckResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Decision band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Below the warn threshold
    Approve,
    /// Between warn and block; still approved
    Warn,
    /// At or above the block threshold
    Block,
}

impl Verdict {
    /// Classify a risk score; a NaN score blocks
    #[inline]
    #[must_use]
    pub fn classify(score: f64, warn_threshold: f64, block_threshold: f64) -> Self {
        if score.is_nan() || score >= block_threshold {
            Self::Block
        } else if score >= warn_threshold {
            Self::Warn
        } else {
            Self::Approve
        }
    }

    /// Marker that leads every recommendation
    #[inline]
    #[must_use]
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Approve => "APPROVED",
            Self::Warn => "WARN",
            Self::Block => "BLOCK",
        }
    }

    /// Whether the action may proceed
    ///
    /// Medium risk fails open, high risk fails closed.
    #[inline]
    #[must_use]
    pub fn is_approved(&self) -> bool {
        !matches!(self, Self::Block)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// Aggregate gate decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    /// Identifier used to resolve the decision's outcome later
    pub decision_id: Uuid,
    /// Identifier of the gated action
    pub action_identifier: String,
    /// Whether the action may proceed
    pub approved: bool,
    /// Decision band
    pub verdict: Verdict,
    /// Weighted risk score in `[0, 100]`
    pub risk_score: f64,
    /// Result of every enabled check, keyed by check name
    pub checks: HashMap<String, RiskCheckResult>,
    /// Checks skipped because their source circuit is open
    pub skipped_checks: Vec<String>,
    /// Merged warnings
    pub warnings: Vec<String>,
    /// Recommendation, led by the verdict marker
    pub recommendation: String,
    /// Evaluation time
    pub timestamp: DateTime<Utc>,
    /// Wall time spent evaluating
    pub elapsed_ms: u64,
    /// Whether the caller cancelled before every check completed
    pub cancelled: bool,
}

impl GateDecision {
    /// Names of checks that did not pass, sorted
    #[must_use]
    pub fn failed_checks(&self) -> Vec<&str> {
        let mut failed: Vec<&str> = self
            .checks
            .values()
            .filter(|r| !r.passed)
            .map(|r| r.name.as_str())
            .collect();
        failed.sort_unstable();
        failed
    }

    /// Names of checks that fell back to a degraded result, sorted
    #[must_use]
    pub fn degraded_checks(&self) -> Vec<&str> {
        let mut degraded: Vec<&str> = self
            .checks
            .values()
            .filter(|r| r.degraded)
            .map(|r| r.name.as_str())
            .collect();
        degraded.sort_unstable();
        degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_boundaries() {
        assert_eq!(Verdict::classify(29.999, 30.0, 60.0), Verdict::Approve);
        assert_eq!(Verdict::classify(30.0, 30.0, 60.0), Verdict::Warn);
        assert_eq!(Verdict::classify(59.999, 30.0, 60.0), Verdict::Warn);
        assert_eq!(Verdict::classify(60.0, 30.0, 60.0), Verdict::Block);
        assert_eq!(Verdict::classify(f64::NAN, 30.0, 60.0), Verdict::Block);
    }

    #[test]
    fn warn_is_still_approved() {
        assert!(Verdict::Approve.is_approved());
        assert!(Verdict::Warn.is_approved());
        assert!(!Verdict::Block.is_approved());
    }
}
