//! Weighted aggregation of concurrently executed risk checks
//!
//! # Critical Invariant
//!
//! Every enabled check has an entry in `GateDecision::checks`. A check that
//! errors, panics, times out or is cut off by cancellation is represented by
//! a degraded result instead of being dropped. Checks whose source circuit is
//! open are absent from both numerator and denominator of the score.

use crate::check::{CheckContext, RiskCheck, RiskCheckResult, DEFAULT_DEGRADED_SCORE};
use crate::config::AggregatorConfig;
use crate::decision::{GateDecision, Verdict};
use crate::error::AggregatorError;
use avp_circuit::CircuitBreakerRegistry;
use avp_common::{Action, SharedClock};
use futures::{stream, FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What to do with partial results when the caller cancels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Fold completed results into a decision; incomplete checks degrade
    #[default]
    BestEffort,
    /// Fail the evaluation unless every check completed
    AllOrNothing,
}

/// Weight-normalised mean of `(score, weight)` pairs, clamped to `[0, 100]`
///
/// Weights are rescaled by a power of two near the largest weight, so
/// extreme magnitudes cannot overflow the sums and ordinary weights give the
/// exact same result. Pairs with a non-finite score or a non-positive weight
/// are ignored. Returns `None` when nothing remains.
#[allow(clippy::cast_possible_truncation)]
pub fn weighted_score<I>(entries: I) -> Option<f64>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let entries: Vec<(f64, f64)> = entries
        .into_iter()
        .filter(|(score, weight)| score.is_finite() && weight.is_finite() && *weight > 0.0)
        .collect();
    let max_weight = entries.iter().map(|(_, w)| *w).fold(0.0_f64, f64::max);
    if max_weight <= 0.0 {
        return None;
    }

    let scale = 2.0_f64.powi(max_weight.log2().floor().clamp(-1022.0, 1023.0) as i32);
    let (numerator, denominator) = entries
        .iter()
        .fold((0.0_f64, 0.0_f64), |(num, den), (score, weight)| {
            let scaled = weight / scale;
            (num + score * scaled, den + scaled)
        });
    let score = numerator / denominator;
    score.is_finite().then(|| score.clamp(0.0, 100.0))
}

/// A check with its weight captured at registration
#[derive(Clone)]
struct Registered {
    check: Arc<dyn RiskCheck>,
    weight: f64,
}

/// Runs registered checks and produces one [`GateDecision`] per action
pub struct RiskAggregator {
    config: AggregatorConfig,
    checks: Vec<Registered>,
    circuits: Arc<CircuitBreakerRegistry>,
    clock: SharedClock,
}

impl RiskAggregator {
    /// Create aggregator with no checks
    #[must_use]
    pub fn new(
        config: AggregatorConfig,
        circuits: Arc<CircuitBreakerRegistry>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            checks: Vec::new(),
            circuits,
            clock,
        }
    }

    /// Register a check
    ///
    /// # Errors
    /// - `AggregatorError::InvalidCheck` for a blank name or a non-positive weight
    /// - `AggregatorError::DuplicateCheck` if the name is taken
    pub fn register(&mut self, check: Arc<dyn RiskCheck>) -> Result<(), AggregatorError> {
        let name = check.name().to_string();
        if name.trim().is_empty() {
            return Err(AggregatorError::InvalidCheck {
                name,
                reason: "name must not be blank".into(),
            });
        }
        let weight = check.weight();
        if !weight.is_finite() || weight <= 0.0 {
            return Err(AggregatorError::InvalidCheck {
                name,
                reason: format!("weight must be positive, got {weight}"),
            });
        }
        if self.checks.iter().any(|c| c.check.name() == name) {
            return Err(AggregatorError::DuplicateCheck(name));
        }

        tracing::info!(check = %name, source = check.source(), weight, "registered risk check");
        self.checks.push(Registered { check, weight });
        Ok(())
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Circuit registry consulted before each check
    #[inline]
    #[must_use]
    pub fn circuits(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.circuits
    }

    /// Registered check names, in registration order
    #[must_use]
    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.check.name()).collect()
    }

    /// Number of registered checks
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Check if no check is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Evaluate an action, waiting for every enabled check
    ///
    /// # Errors
    /// Returns `AggregatorError::InvalidAction` for a structurally invalid action
    pub async fn evaluate(&self, action: &Action) -> Result<GateDecision, AggregatorError> {
        self.evaluate_until(action, std::future::pending::<()>(), CompletionPolicy::BestEffort)
            .await
    }

    /// Evaluate an action until `cancel` resolves
    ///
    /// In-flight checks are dropped on cancellation. With
    /// [`CompletionPolicy::BestEffort`] they are folded in as degraded results.
    ///
    /// # Errors
    /// - `AggregatorError::InvalidAction` for a structurally invalid action
    /// - `AggregatorError::Cancelled` if cancelled under
    ///   [`CompletionPolicy::AllOrNothing`] with checks outstanding
    pub async fn evaluate_until<C>(
        &self,
        action: &Action,
        cancel: C,
        policy: CompletionPolicy,
    ) -> Result<GateDecision, AggregatorError>
    where
        C: Future<Output = ()>,
    {
        action.validate()?;

        let started = Instant::now();
        let context = CheckContext::new(self.clock.now(), action.context().clone());

        let mut enabled: Vec<Registered> = Vec::with_capacity(self.checks.len());
        let mut skipped = Vec::new();
        for registered in &self.checks {
            let check = &registered.check;
            if self.circuits.is_enabled(check.source()) {
                enabled.push(registered.clone());
            } else {
                tracing::debug!(check = check.name(), source = check.source(), "skipping check, circuit open");
                metrics::counter!("avp_risk_checks_skipped_total", "check" => check.name().to_string())
                    .increment(1);
                skipped.push(check.name().to_string());
            }
        }

        let (mut results, interrupted) = self.run_enabled(&enabled, action, &context, cancel).await;

        let outstanding = enabled.len() - results.len();
        let cancelled = interrupted && outstanding > 0;
        if cancelled {
            if policy == CompletionPolicy::AllOrNothing {
                tracing::warn!(
                    decision_id = %context.evaluation_id,
                    outstanding,
                    total = enabled.len(),
                    "evaluation cancelled"
                );
                return Err(AggregatorError::Cancelled {
                    outstanding,
                    total: enabled.len(),
                });
            }
            for Registered { check, .. } in &enabled {
                if !results.contains_key(check.name()) {
                    let result = degraded_result(check.as_ref(), "cancelled before completion");
                    results.insert(check.name().to_string(), result);
                }
            }
        }

        let score = weighted_score(
            enabled
                .iter()
                .filter_map(|c| results.get(c.check.name()).map(|r| (r.score, c.weight))),
        );

        let decision = self.decide(
            action,
            &context,
            DecisionInputs {
                score,
                results,
                skipped,
                cancelled,
                outstanding,
                elapsed: started.elapsed(),
            },
        );
        Ok(decision)
    }

    async fn run_enabled<C>(
        &self,
        enabled: &[Registered],
        action: &Action,
        context: &CheckContext,
        cancel: C,
    ) -> (HashMap<String, RiskCheckResult>, bool)
    where
        C: Future<Output = ()>,
    {
        let mut results = HashMap::with_capacity(enabled.len());
        if enabled.is_empty() {
            return (results, false);
        }

        let limit = self
            .config
            .max_parallel_checks
            .unwrap_or(enabled.len())
            .clamp(1, enabled.len());
        let timeout = self.config.check_timeout();

        let mut in_flight = pin!(stream::iter(
            enabled
                .iter()
                .map(move |c| run_check(Arc::clone(&c.check), action, context, timeout)),
        )
        .buffer_unordered(limit));
        let mut cancel = pin!(cancel);

        loop {
            tokio::select! {
                biased;
                next = in_flight.next() => match next {
                    Some(result) => {
                        results.insert(result.name.clone(), result);
                    }
                    None => return (results, false),
                },
                () = &mut cancel => return (results, true),
            }
        }
    }

    fn decide(&self, action: &Action, context: &CheckContext, inputs: DecisionInputs) -> GateDecision {
        let DecisionInputs {
            score,
            results,
            skipped,
            cancelled,
            outstanding,
            elapsed,
        } = inputs;

        let mut risk_score = score.unwrap_or(self.config.empty_set_score).clamp(0.0, 100.0);
        let mut warnings = Vec::new();
        if risk_score.is_nan() {
            tracing::error!(decision_id = %context.evaluation_id, "risk score is not a number; blocking");
            warnings.push("risk score could not be computed; treated as maximum risk".to_string());
            risk_score = 100.0;
        }
        let verdict = Verdict::classify(
            risk_score,
            self.config.warn_threshold,
            self.config.block_threshold,
        );

        let mut names: Vec<&String> = results.keys().collect();
        names.sort();

        for name in &names {
            for warning in &results[*name].warnings {
                warnings.push(format!("[{name}] {warning}"));
            }
        }
        for name in &skipped {
            warnings.push(format!("[{name}] skipped: source circuit open"));
        }
        if score.is_none() {
            warnings.push(format!(
                "no risk checks enabled; defaulting to risk score {risk_score:.1}"
            ));
        }
        if cancelled {
            warnings.push(format!(
                "evaluation cancelled; {outstanding} incomplete checks treated as degraded"
            ));
        }

        let failed: Vec<&str> = names
            .iter()
            .filter(|n| !results[n.as_str()].passed)
            .map(|n| n.as_str())
            .collect();
        let recommendation = recommendation(verdict, risk_score, &self.config, &failed, score.is_none());

        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        metrics::counter!("avp_gate_decisions_total", "verdict" => verdict.marker()).increment(1);
        metrics::histogram!("avp_gate_evaluation_seconds").record(elapsed.as_secs_f64());
        tracing::info!(
            decision_id = %context.evaluation_id,
            action = %action,
            %verdict,
            risk_score,
            checks = results.len(),
            skipped = skipped.len(),
            elapsed_ms,
            "gate decision"
        );

        GateDecision {
            decision_id: context.evaluation_id,
            action_identifier: action.identifier().to_string(),
            approved: verdict.is_approved(),
            verdict,
            risk_score,
            checks: results,
            skipped_checks: skipped,
            warnings,
            recommendation,
            timestamp: context.started_at,
            elapsed_ms,
            cancelled,
        }
    }
}

impl fmt::Debug for RiskAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RiskAggregator")
            .field("config", &self.config)
            .field("checks", &self.check_names())
            .finish_non_exhaustive()
    }
}

struct DecisionInputs {
    score: Option<f64>,
    results: HashMap<String, RiskCheckResult>,
    skipped: Vec<String>,
    cancelled: bool,
    outstanding: usize,
    elapsed: Duration,
}

fn recommendation(
    verdict: Verdict,
    score: f64,
    config: &AggregatorConfig,
    failed: &[&str],
    no_checks: bool,
) -> String {
    let failed_list = if failed.is_empty() {
        "none".to_string()
    } else {
        failed.join(", ")
    };
    match verdict {
        Verdict::Approve => format!(
            "APPROVED: risk score {score:.1} below warn threshold {:.1}",
            config.warn_threshold
        ),
        Verdict::Warn if no_checks => format!(
            "WARN: risk unknown, no checks enabled; proceeding at default score {score:.1}"
        ),
        Verdict::Warn => format!(
            "WARN: elevated risk score {score:.1}; failed checks: {failed_list}"
        ),
        Verdict::Block => format!(
            "BLOCK: risk score {score:.1} at or above block threshold {:.1}; failed checks: {failed_list}",
            config.block_threshold
        ),
    }
}

async fn run_check(
    check: Arc<dyn RiskCheck>,
    action: &Action,
    context: &CheckContext,
    timeout: Duration,
) -> RiskCheckResult {
    let guarded = AssertUnwindSafe(check.evaluate(action, context)).catch_unwind();
    match tokio::time::timeout(timeout, guarded).await {
        Ok(Ok(Ok(result))) => {
            tracing::debug!(check = check.name(), score = result.score, passed = result.passed, "check completed");
            sanitize(check.as_ref(), result)
        }
        Ok(Ok(Err(err))) => degraded_result(check.as_ref(), &err.to_string()),
        Ok(Err(_)) => degraded_result(check.as_ref(), "check panicked"),
        Err(_) => degraded_result(
            check.as_ref(),
            &format!("timed out after {}ms", timeout.as_millis()),
        ),
    }
}

/// Enforce the result contract: matching name, source filled, score in range
fn sanitize(check: &dyn RiskCheck, mut result: RiskCheckResult) -> RiskCheckResult {
    if result.name != check.name() {
        tracing::warn!(check = check.name(), reported = %result.name, "check reported a different name");
        result.name = check.name().to_string();
    }
    result.source = check.source().to_string();

    if result.score.is_nan() {
        let fallback = baseline_score(check);
        tracing::warn!(check = check.name(), fallback, "check returned NaN score");
        result
            .warnings
            .push(format!("score was not a number; using baseline {fallback:.1}"));
        result.score = fallback;
    } else if !(0.0..=100.0).contains(&result.score) {
        let clamped = result.score.clamp(0.0, 100.0);
        tracing::warn!(check = check.name(), score = result.score, clamped, "check score out of range");
        result.warnings.push(format!(
            "score {:.1} outside [0, 100], clamped to {clamped:.1}",
            result.score
        ));
        result.score = clamped;
    }
    result
}

fn baseline_score(check: &dyn RiskCheck) -> f64 {
    let score = check.degraded_score();
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        DEFAULT_DEGRADED_SCORE
    }
}

fn degraded_result(check: &dyn RiskCheck, reason: &str) -> RiskCheckResult {
    tracing::warn!(check = check.name(), source = check.source(), reason, "risk check degraded");
    metrics::counter!("avp_risk_checks_degraded_total", "check" => check.name().to_string())
        .increment(1);

    let mut result = RiskCheckResult::degraded(check.name(), baseline_score(check), reason);
    result.source = check.source().to_string();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckError;
    use avp_circuit::CircuitConfig;
    use avp_common::{ActionKind, ManualClock};

    struct Fixed {
        name: &'static str,
        score: f64,
        passed: bool,
        weight: f64,
    }

    #[async_trait::async_trait]
    impl RiskCheck for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn weight(&self) -> f64 {
            self.weight
        }

        async fn evaluate(
            &self,
            _action: &Action,
            _context: &CheckContext,
        ) -> Result<RiskCheckResult, CheckError> {
            Ok(if self.passed {
                RiskCheckResult::pass(self.name, self.score)
            } else {
                RiskCheckResult::fail(self.name, self.score)
            })
        }
    }

    struct Broken;

    #[async_trait::async_trait]
    impl RiskCheck for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn degraded_score(&self) -> f64 {
            15.0
        }

        async fn evaluate(
            &self,
            _action: &Action,
            _context: &CheckContext,
        ) -> Result<RiskCheckResult, CheckError> {
            Err(CheckError::Unavailable("broker api down".into()))
        }
    }

    fn fixed(name: &'static str, score: f64, passed: bool) -> Arc<dyn RiskCheck> {
        Arc::new(Fixed {
            name,
            score,
            passed,
            weight: 1.0,
        })
    }

    fn aggregator() -> RiskAggregator {
        let clock = Arc::new(ManualClock::starting_now());
        let circuits = Arc::new(CircuitBreakerRegistry::new(
            CircuitConfig::default(),
            clock.clone(),
        ));
        RiskAggregator::new(AggregatorConfig::default(), circuits, clock)
    }

    fn buy() -> Action {
        Action::new("AAPL", ActionKind::Buy, 5_000.0)
    }

    #[test]
    fn weighted_score_normalises() {
        assert_eq!(weighted_score([(10.0, 1.0)]), Some(10.0));
        assert_eq!(weighted_score([(80.0, 1.0), (90.0, 1.0)]), Some(85.0));
        assert_eq!(weighted_score([(0.0, 3.0), (100.0, 1.0)]), Some(25.0));
        assert_eq!(weighted_score(std::iter::empty()), None);
    }

    #[test]
    fn weighted_score_survives_extreme_weights() {
        assert_eq!(weighted_score([(100.0, f64::MAX), (100.0, f64::MAX)]), Some(100.0));
        assert_eq!(weighted_score([(0.0, f64::MAX), (100.0, f64::MAX)]), Some(50.0));
        assert_eq!(weighted_score([(40.0, f64::MIN_POSITIVE)]), Some(40.0));
        assert_eq!(weighted_score([(f64::NAN, 1.0), (30.0, 1.0)]), Some(30.0));
        assert_eq!(weighted_score([(30.0, f64::INFINITY)]), None);
    }

    #[test]
    fn register_rejects_bad_weight_and_duplicates() {
        let mut agg = aggregator();
        let bad = Arc::new(Fixed {
            name: "bad",
            score: 0.0,
            passed: true,
            weight: 0.0,
        });
        assert!(matches!(
            agg.register(bad),
            Err(AggregatorError::InvalidCheck { .. })
        ));

        agg.register(fixed("a", 1.0, true)).unwrap();
        assert_eq!(
            agg.register(fixed("a", 2.0, true)),
            Err(AggregatorError::DuplicateCheck("a".into()))
        );
        assert_eq!(agg.len(), 1);
    }

    #[tokio::test]
    async fn error_becomes_degraded_result() {
        let mut agg = aggregator();
        agg.register(Arc::new(Broken)).unwrap();

        let decision = agg.evaluate(&buy()).await.unwrap();
        let result = &decision.checks["broken"];
        assert!(result.passed);
        assert!(result.degraded);
        assert_eq!(result.score, 15.0);
        assert_eq!(decision.risk_score, 15.0);
        assert!(decision.approved);
        assert!(decision.warnings.iter().any(|w| w.contains("broker api down")));
    }

    #[tokio::test]
    async fn out_of_range_score_is_clamped() {
        let mut agg = aggregator();
        agg.register(fixed("wild", 250.0, false)).unwrap();

        let decision = agg.evaluate(&buy()).await.unwrap();
        assert_eq!(decision.risk_score, 100.0);
        assert_eq!(decision.checks["wild"].score, 100.0);
        assert!(decision.warnings.iter().any(|w| w.contains("clamped")));
    }

    #[tokio::test]
    async fn open_circuit_excludes_check_from_denominator() {
        let mut agg = aggregator();
        agg.register(fixed("low", 10.0, true)).unwrap();
        agg.register(fixed("high", 90.0, false)).unwrap();
        agg.circuits().force_trip("high", "test");

        let decision = agg.evaluate(&buy()).await.unwrap();
        assert_eq!(decision.risk_score, 10.0);
        assert!(!decision.checks.contains_key("high"));
        assert_eq!(decision.skipped_checks, vec!["high".to_string()]);
    }

    #[tokio::test]
    async fn warn_band_lists_failed_checks() {
        let mut agg = aggregator();
        agg.register(fixed("momentum", 20.0, true)).unwrap();
        agg.register(fixed("similar_losses", 70.0, false)).unwrap();

        let decision = agg.evaluate(&buy()).await.unwrap();
        assert_eq!(decision.risk_score, 45.0);
        assert!(decision.approved);
        assert!(decision.recommendation.starts_with("WARN"));
        assert!(decision.recommendation.contains("similar_losses"));
    }

    #[tokio::test]
    async fn invalid_action_is_an_error() {
        let agg = aggregator();
        let err = agg
            .evaluate(&Action::new("", ActionKind::Buy, 10.0))
            .await
            .unwrap_err();
        assert!(err.is_input_error());
    }
}
