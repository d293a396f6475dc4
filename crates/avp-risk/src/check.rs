//! Risk check capability contract
//!
//! Concrete checks (semantic similarity, technical indicators, position
//! reconciliation, ...) live outside this crate; the aggregator only sees
//! this trait.

use avp_common::Action;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Baseline score for a check that could not run properly
pub const DEFAULT_DEGRADED_SCORE: f64 = 20.0;

/// Recoverable check failures
///
/// The aggregator turns every one of these into a degraded result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    /// A dependency (broker, index, market data) could not be reached
    #[error("dependency unavailable: {0}")]
    Unavailable(String),

    /// Input data required by the check is missing
    #[error("missing data: {0}")]
    MissingData(String),

    /// The dependency answered with something unusable
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Per-evaluation context handed to every check
#[derive(Debug, Clone)]
pub struct CheckContext {
    /// Evaluation (and resulting decision) identifier
    pub evaluation_id: Uuid,
    /// When the evaluation started
    pub started_at: DateTime<Utc>,
    /// The action's pass-through context
    pub attributes: Map<String, Value>,
}

impl CheckContext {
    /// Create context for a new evaluation
    #[inline]
    #[must_use]
    pub fn new(started_at: DateTime<Utc>, attributes: Map<String, Value>) -> Self {
        Self {
            evaluation_id: Uuid::new_v4(),
            started_at,
            attributes,
        }
    }

    /// Look up a context attribute
    #[inline]
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// A check that scores the risk of a proposed action
///
/// Implementations should not error for recoverable conditions; return
/// [`RiskCheckResult::degraded`] instead. Errors, panics and timeouts are
/// still caught by the aggregator.
#[async_trait::async_trait]
pub trait RiskCheck: Send + Sync {
    /// Unique check name
    fn name(&self) -> &str;

    /// Signal source whose circuit gates this check
    fn source(&self) -> &str {
        self.name()
    }

    /// Positive aggregation weight
    fn weight(&self) -> f64 {
        1.0
    }

    /// Score used when the check cannot run
    fn degraded_score(&self) -> f64 {
        DEFAULT_DEGRADED_SCORE
    }

    /// Score the action
    async fn evaluate(
        &self,
        action: &Action,
        context: &CheckContext,
    ) -> Result<RiskCheckResult, CheckError>;
}

/// Output of one check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCheckResult {
    /// Check name
    pub name: String,
    /// Source the check reads from (filled in by the aggregator)
    #[serde(default)]
    pub source: String,
    /// Whether the check considers the action acceptable
    pub passed: bool,
    /// Risk score in `[0, 100]`, higher is riskier
    pub score: f64,
    /// Check-specific details
    #[serde(default)]
    pub details: Map<String, Value>,
    /// Human-readable warnings
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Check-level recommendation
    #[serde(default)]
    pub recommendation: String,
    /// True when produced by the fail-soft path
    #[serde(default)]
    pub degraded: bool,
}

impl RiskCheckResult {
    /// Passing result
    #[must_use]
    pub fn pass(name: impl Into<String>, score: f64) -> Self {
        Self::new(name, true, score)
    }

    /// Failing result
    #[must_use]
    pub fn fail(name: impl Into<String>, score: f64) -> Self {
        Self::new(name, false, score)
    }

    /// Fail-soft result: passed, baseline score, degraded warning
    #[must_use]
    pub fn degraded(name: impl Into<String>, score: f64, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let mut result = Self::new(name, true, score);
        result.degraded = true;
        result.recommendation = "degraded".to_string();
        result.warnings.push(format!("degraded operation: {reason}"));
        result
    }

    fn new(name: impl Into<String>, passed: bool, score: f64) -> Self {
        let name = name.into();
        Self {
            source: name.clone(),
            name,
            passed,
            score,
            details: Map::new(),
            warnings: Vec::new(),
            recommendation: String::new(),
            degraded: false,
        }
    }

    /// With a warning
    #[inline]
    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// With a detail entry
    #[inline]
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// With a recommendation
    #[inline]
    #[must_use]
    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = recommendation.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_result_passes_with_warning() {
        let result = RiskCheckResult::degraded("similarity", 25.0, "index offline");
        assert!(result.passed);
        assert!(result.degraded);
        assert_eq!(result.score, 25.0);
        assert!(result.warnings[0].contains("index offline"));
    }

    #[test]
    fn builders() {
        let result = RiskCheckResult::fail("positions", 80.0)
            .with_warning("broker reports 0 shares")
            .with_detail("broker_qty", 0)
            .with_recommendation("reconcile before trading");
        assert!(!result.passed);
        assert_eq!(result.source, "positions");
        assert_eq!(result.details.get("broker_qty"), Some(&Value::from(0)));
        assert_eq!(result.recommendation, "reconcile before trading");
    }

    #[test]
    fn context_attributes() {
        let mut attrs = Map::new();
        attrs.insert("strategy".into(), Value::from("mean_reversion"));
        let ctx = CheckContext::new(Utc::now(), attrs);
        assert_eq!(
            ctx.attribute("strategy").and_then(Value::as_str),
            Some("mean_reversion")
        );
        assert!(ctx.attribute("missing").is_none());
    }
}
