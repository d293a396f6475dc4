//! The safety gate facade
//!
//! Owns the circuit registry, the risk aggregator and the anomaly engine for
//! the life of the process, and wires them together:
//! - decisions are remembered until their outcome is known, then resolved
//!   into per-source correctness observations
//! - anomalies at or above `trip_sources_at` force the named source open
//! - every state-changing call lands in the hash-chained audit log

use crate::audit::{AuditKind, AuditLog};
use crate::config::GateConfig;
use crate::error::GateError;
use avp_anomaly::{
    Alerter, AnomalyEscalationEngine, AnomalyEvent, AnomalyPattern, DailySummary,
    EscalationResult, LessonSink, MemoryLessonBook, PatternId, TracingAlerter,
};
use avp_circuit::{
    CircuitAction, CircuitBreakerRegistry, CircuitState, OutcomeReport, SourceReliability,
};
use avp_common::{Action, JsonDirStore, RecordStore, SharedClock, SystemClock, WriteBehindStore};
use avp_risk::{CompletionPolicy, GateDecision, RiskAggregator, RiskCheck};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

const SOURCES_DIR: &str = "sources";
const PATTERNS_DIR: &str = "patterns";

/// Verdict a check gave, kept until the decision is resolved
#[derive(Debug, Clone)]
struct CheckSignal {
    check: String,
    source: String,
    passed: bool,
}

#[derive(Debug)]
struct PendingDecision {
    action_identifier: String,
    signals: Vec<CheckSignal>,
}

/// Point-in-time health snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateHealth {
    /// Registered checks, in registration order
    pub registered_checks: Vec<String>,
    /// Sources whose circuit is Open, sorted
    pub disabled_sources: Vec<String>,
    /// Sources with reliability history
    pub sources_tracked: usize,
    /// Known anomaly patterns
    pub patterns_tracked: usize,
    /// Patterns at CRITICAL, sorted
    pub critical_patterns: Vec<PatternId>,
    /// Decisions awaiting resolution
    pub pending_decisions: u64,
    /// Retained audit entries
    pub audit_entries: usize,
    /// Whether the retained audit chain verifies
    pub audit_intact: bool,
}

impl GateHealth {
    /// No source disabled, no pattern critical and the audit chain intact
    #[must_use]
    pub fn is_nominal(&self) -> bool {
        self.disabled_sources.is_empty() && self.critical_patterns.is_empty() && self.audit_intact
    }
}

/// Builder for [`SafetyGate`]
pub struct SafetyGateBuilder {
    config: GateConfig,
    clock: Option<SharedClock>,
    checks: Vec<Arc<dyn RiskCheck>>,
    lessons: Option<Arc<dyn LessonSink>>,
    alerter: Option<Arc<dyn Alerter>>,
}

impl SafetyGateBuilder {
    /// Start from a configuration
    #[must_use]
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            clock: None,
            checks: Vec::new(),
            lessons: None,
            alerter: None,
        }
    }

    /// Use an explicit clock (system clock otherwise)
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Register a check
    #[must_use]
    pub fn with_check(mut self, check: Arc<dyn RiskCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Register several checks
    #[must_use]
    pub fn with_checks(mut self, checks: impl IntoIterator<Item = Arc<dyn RiskCheck>>) -> Self {
        self.checks.extend(checks);
        self
    }

    /// Deliver lessons to `sink` (in-memory book otherwise)
    #[must_use]
    pub fn with_lesson_sink(mut self, sink: Arc<dyn LessonSink>) -> Self {
        self.lessons = Some(sink);
        self
    }

    /// Deliver escalations to `alerter` (log only otherwise)
    #[must_use]
    pub fn with_alerter(mut self, alerter: Arc<dyn Alerter>) -> Self {
        self.alerter = Some(alerter);
        self
    }

    /// Validate configuration, open durable state and assemble the gate
    ///
    /// # Errors
    /// - `GateError::Config` for invalid configuration
    /// - `GateError::Registration` for a rejected check
    /// - `GateError::Store` if the state directory cannot be opened or read
    /// - `GateError::Audit` if the audit journal cannot be opened
    pub fn build(self) -> Result<SafetyGate, GateError> {
        let Self {
            config,
            clock,
            checks,
            lessons,
            alerter,
        } = self;
        config.validate()?;
        let clock = clock.unwrap_or_else(SystemClock::shared);

        let mut audit = AuditLog::new(config.audit_capacity);
        if let Some(path) = &config.audit_journal {
            audit = audit.with_journal(path)?;
        }
        let audit = Arc::new(audit);

        // other transitions are audited by the gate call that caused them
        let hook_audit = Arc::clone(&audit);
        let mut circuits = CircuitBreakerRegistry::new(config.circuit.clone(), clock.clone())
            .with_transition_hook(Arc::new(
                move |record: &SourceReliability, action: CircuitAction| {
                    if action == CircuitAction::HalfOpened {
                        hook_audit.append(
                            AuditKind::Transition,
                            record.source.as_str(),
                            json!({
                                "action": action,
                                "state": record.state,
                                "trip_count": record.trip_count,
                            }),
                            record.last_transition_at,
                        );
                    }
                },
            ));
        let mut anomalies = AnomalyEscalationEngine::new(
            config.escalation.clone(),
            clock.clone(),
            lessons.unwrap_or_else(|| Arc::new(MemoryLessonBook::new())),
            alerter.unwrap_or_else(|| Arc::new(TracingAlerter)),
        );
        if let Some(dir) = &config.state_dir {
            let sources = JsonDirStore::open(dir.join(SOURCES_DIR))?;
            let patterns = JsonDirStore::open(dir.join(PATTERNS_DIR))?;
            circuits = circuits.with_store(write_behind(sources));
            anomalies = anomalies.with_store(write_behind(patterns));
            circuits.restore()?;
            anomalies.restore()?;
        }
        let circuits = Arc::new(circuits);

        let mut aggregator =
            RiskAggregator::new(config.aggregator.clone(), Arc::clone(&circuits), clock.clone());
        for check in checks {
            aggregator.register(check)?;
        }

        let pending = Cache::builder()
            .max_capacity(config.pending_decision_capacity)
            .time_to_live(config.pending_decision_ttl())
            .build();

        tracing::info!(
            checks = aggregator.len(),
            sources = circuits.len(),
            patterns = anomalies.len(),
            persistent = config.state_dir.is_some(),
            "safety gate ready"
        );

        Ok(SafetyGate {
            config,
            clock,
            circuits,
            aggregator,
            anomalies,
            pending,
            audit,
        })
    }
}

/// Keep file writes off the evaluation path
fn write_behind<R>(store: JsonDirStore) -> Arc<dyn RecordStore<R>>
where
    R: Serialize + serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
{
    Arc::new(WriteBehindStore::new(Arc::new(store)))
}

impl fmt::Debug for SafetyGateBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafetyGateBuilder")
            .field("config", &self.config)
            .field("checks", &self.checks.len())
            .finish_non_exhaustive()
    }
}

/// Synchronous pre-execution safety gate
pub struct SafetyGate {
    config: GateConfig,
    clock: SharedClock,
    circuits: Arc<CircuitBreakerRegistry>,
    aggregator: RiskAggregator,
    anomalies: AnomalyEscalationEngine,
    pending: Cache<Uuid, Arc<PendingDecision>>,
    audit: Arc<AuditLog>,
}

impl SafetyGate {
    /// Start building a gate
    #[must_use]
    pub fn builder(config: GateConfig) -> SafetyGateBuilder {
        SafetyGateBuilder::new(config)
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Circuit registry shared with the aggregator
    #[inline]
    #[must_use]
    pub fn circuits(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.circuits
    }

    /// Audit trail
    #[inline]
    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Decide whether `action` may proceed
    ///
    /// # Errors
    /// Returns `GateError::InvalidAction` for a structurally invalid action
    pub async fn evaluate(&self, action: &Action) -> Result<GateDecision, GateError> {
        self.evaluate_until(action, std::future::pending::<()>(), CompletionPolicy::BestEffort)
            .await
    }

    /// Decide whether `action` may proceed, giving up when `cancel` resolves
    ///
    /// # Errors
    /// - `GateError::InvalidAction` for a structurally invalid action
    /// - `GateError::Cancelled` if cancelled under [`CompletionPolicy::AllOrNothing`]
    pub async fn evaluate_until<C>(
        &self,
        action: &Action,
        cancel: C,
        policy: CompletionPolicy,
    ) -> Result<GateDecision, GateError>
    where
        C: Future<Output = ()>,
    {
        let decision = match self.aggregator.evaluate_until(action, cancel, policy).await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::warn!(action = %action, error = %err, "evaluation rejected");
                return Err(err.into());
            }
        };

        let signals: Vec<CheckSignal> = self
            .aggregator
            .check_names()
            .into_iter()
            .filter_map(|name| decision.checks.get(name))
            .filter(|result| !result.degraded)
            .map(|result| CheckSignal {
                check: result.name.clone(),
                source: result.source.clone(),
                passed: result.passed,
            })
            .collect();
        self.pending
            .insert(
                decision.decision_id,
                Arc::new(PendingDecision {
                    action_identifier: decision.action_identifier.clone(),
                    signals,
                }),
            )
            .await;

        self.audit.append(
            AuditKind::Decision,
            decision.decision_id.to_string(),
            json!({
                "action": action.to_string(),
                "verdict": decision.verdict,
                "approved": decision.approved,
                "risk_score": decision.risk_score,
                "failed_checks": decision.failed_checks(),
                "degraded_checks": decision.degraded_checks(),
                "skipped_checks": decision.skipped_checks,
                "cancelled": decision.cancelled,
            }),
            decision.timestamp,
        );
        Ok(decision)
    }

    /// Resolve a decision once its real-world outcome is known
    ///
    /// Every non-degraded check is scored as correct when its verdict matched
    /// the outcome: it failed a harmful action or passed a harmless one.
    ///
    /// # Errors
    /// Returns `GateError::UnknownDecision` if the id was never issued, was
    /// already resolved or has expired
    pub async fn resolve_decision(
        &self,
        decision_id: Uuid,
        harmful: bool,
    ) -> Result<Vec<OutcomeReport>, GateError> {
        let pending = self
            .pending
            .remove(&decision_id)
            .await
            .ok_or(GateError::UnknownDecision(decision_id))?;

        let reports: Vec<OutcomeReport> = pending
            .signals
            .iter()
            .map(|signal| {
                let was_correct = signal.passed != harmful;
                tracing::debug!(check = %signal.check, source = %signal.source, was_correct, "resolving check");
                self.circuits.record_outcome(&signal.source, was_correct)
            })
            .collect();

        metrics::counter!("avp_gate_resolutions_total", "harmful" => if harmful { "true" } else { "false" })
            .increment(1);
        self.audit.append(
            AuditKind::Resolution,
            decision_id.to_string(),
            json!({
                "action": pending.action_identifier,
                "harmful": harmful,
                "outcomes": reports
                    .iter()
                    .zip(&pending.signals)
                    .map(|(r, signal)| json!({
                        "check": signal.check,
                        "was_correct": signal.passed != harmful,
                        "source": r.source,
                        "state": r.state,
                        "action_taken": r.action_taken,
                    }))
                    .collect::<Vec<_>>(),
            }),
            self.clock.now(),
        );
        Ok(reports)
    }

    /// Record ground truth for a source directly
    pub fn record_outcome(&self, source: &str, was_correct: bool) -> OutcomeReport {
        let report = self.circuits.record_outcome(source, was_correct);
        self.audit.append(
            AuditKind::Outcome,
            source,
            json!({
                "was_correct": was_correct,
                "state": report.state,
                "action_taken": report.action_taken,
                "accuracy": report.accuracy,
            }),
            self.clock.now(),
        );
        report
    }

    /// Whether checks backed by `source` currently run
    #[must_use]
    pub fn is_enabled(&self, source: &str) -> bool {
        self.circuits.is_enabled(source)
    }

    /// Current circuit state of `source`
    #[must_use]
    pub fn source_state(&self, source: &str) -> CircuitState {
        self.circuits.state(source)
    }

    /// Report an anomaly from a verifier or monitor
    pub async fn report_anomaly(&self, event: &AnomalyEvent) -> EscalationResult {
        let result = self.anomalies.process(event).await;

        let mut tripped = None;
        if result.severity >= self.config.trip_sources_at {
            if let Some(source) = &event.source {
                let reason = format!(
                    "anomaly pattern {} at {} after {} occurrences",
                    result.pattern_id, result.severity, result.occurrence_count
                );
                if self.circuits.force_trip(source, reason.as_str()) == CircuitAction::ForcedOpen {
                    self.audit.append(
                        AuditKind::ForcedTrip,
                        source.as_str(),
                        json!({ "reason": reason, "pattern": result.pattern_id }),
                        self.clock.now(),
                    );
                    tripped = Some(source.clone());
                }
            }
        }

        self.audit.append(
            AuditKind::Anomaly,
            result.pattern_id.as_str(),
            json!({
                "occurrence_count": result.occurrence_count,
                "severity": result.severity,
                "lesson_created": result.lesson_created_now,
                "escalated": result.escalated_now,
                "escalation_ref": result.escalation_ref,
                "tripped_source": tripped,
            }),
            self.clock.now(),
        );
        result
    }

    /// Operator override: close a source's circuit
    ///
    /// # Errors
    /// Returns `GateError::Circuit` if the source was never observed
    pub fn force_reset(&self, source: &str) -> Result<SourceReliability, GateError> {
        let record = self.circuits.force_reset(source)?;
        self.audit.append(
            AuditKind::Reset,
            source,
            json!({
                "total_observations": record.total_observations,
                "correct_observations": record.correct_observations,
                "trip_count": record.trip_count,
            }),
            self.clock.now(),
        );
        Ok(record)
    }

    /// Operator override: open a source's circuit
    pub fn force_trip(&self, source: &str, reason: &str) -> CircuitAction {
        let action = self.circuits.force_trip(source, reason);
        if action == CircuitAction::ForcedOpen {
            self.audit.append(
                AuditKind::ForcedTrip,
                source,
                json!({ "reason": reason }),
                self.clock.now(),
            );
        }
        action
    }

    /// Sources currently disabled, sorted
    #[must_use]
    pub fn list_disabled(&self) -> Vec<String> {
        self.circuits.list_disabled()
    }

    /// Reliability record of one source
    #[must_use]
    pub fn source_snapshot(&self, source: &str) -> Option<SourceReliability> {
        self.circuits.snapshot(source)
    }

    /// Recurrence state of one pattern
    pub async fn pattern(&self, pattern_id: &str) -> Option<AnomalyPattern> {
        self.anomalies.pattern(pattern_id).await
    }

    /// Patterns currently at CRITICAL
    pub async fn critical_patterns(&self) -> Vec<AnomalyPattern> {
        self.anomalies.critical_patterns().await
    }

    /// Anomaly summary for the open window
    pub async fn daily_summary(&self) -> DailySummary {
        self.anomalies.daily_summary().await
    }

    /// Close the anomaly window and start a new one
    pub async fn close_window(&self) -> DailySummary {
        self.anomalies.close_window().await
    }

    /// Health snapshot
    pub async fn health(&self) -> GateHealth {
        self.pending.run_pending_tasks().await;
        let critical_patterns = self
            .anomalies
            .critical_patterns()
            .await
            .into_iter()
            .map(|p| p.pattern_id)
            .collect();
        GateHealth {
            registered_checks: self
                .aggregator
                .check_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            disabled_sources: self.circuits.list_disabled(),
            sources_tracked: self.circuits.len(),
            patterns_tracked: self.anomalies.len(),
            critical_patterns,
            pending_decisions: self.pending.entry_count(),
            audit_entries: self.audit.len(),
            audit_intact: self.audit.verify_integrity().is_ok(),
        }
    }
}

impl fmt::Debug for SafetyGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafetyGate")
            .field("aggregator", &self.aggregator)
            .field("circuits", &self.circuits)
            .field("anomalies", &self.anomalies)
            .finish_non_exhaustive()
    }
}
