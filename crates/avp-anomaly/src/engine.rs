//! Anomaly recurrence engine
//!
//! # Critical Invariant
//!
//! Updates to one pattern are serialised by that pattern's async mutex, which
//! stays held while the lesson and alert collaborators run. A pattern's lesson
//! and its CRITICAL escalation are therefore each attempted at most once, and
//! no occurrence is lost under concurrent reports.

use crate::collaborators::{Alerter, EscalationPayload, Lesson, LessonSink};
use crate::error::DeliveryError;
use crate::event::{AnomalyEvent, PatternId};
use crate::pattern::{AnomalyPattern, EscalationResult};
use crate::playbook;
use crate::policy::EscalationPolicy;
use crate::window::{DailySummary, WindowCounters};
use avp_common::{RecordStore, SeverityTier, SharedClock, StoreError};
use dashmap::DashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

type Entry = Arc<Mutex<AnomalyPattern>>;

/// Tracks recurring anomaly patterns and drives their side effects
pub struct AnomalyEscalationEngine {
    policy: EscalationPolicy,
    clock: SharedClock,
    patterns: DashMap<PatternId, Entry>,
    lessons: Arc<dyn LessonSink>,
    alerter: Arc<dyn Alerter>,
    store: Option<Arc<dyn RecordStore<AnomalyPattern>>>,
    window: parking_lot::Mutex<WindowCounters>,
}

impl AnomalyEscalationEngine {
    /// Create engine with no known patterns
    #[must_use]
    pub fn new(
        policy: EscalationPolicy,
        clock: SharedClock,
        lessons: Arc<dyn LessonSink>,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        let window = WindowCounters::new(clock.now());
        Self {
            policy,
            clock,
            patterns: DashMap::new(),
            lessons,
            alerter,
            store: None,
            window: parking_lot::Mutex::new(window),
        }
    }

    /// Write every pattern update through to `store`
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn RecordStore<AnomalyPattern>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Load persisted patterns, replacing in-memory patterns with the same id
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be read
    pub fn restore(&self) -> Result<usize, StoreError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let records = store.load_all()?;
        let count = records.len();
        for record in records {
            self.patterns
                .insert(record.pattern_id.clone(), Arc::new(Mutex::new(record)));
        }
        tracing::info!(count, "restored anomaly patterns");
        Ok(count)
    }

    /// Policy in use
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    /// Record one occurrence and run any due side effects
    pub async fn process(&self, event: &AnomalyEvent) -> EscalationResult {
        let pattern_id = event.pattern_id();
        let entry = self.get_or_create(&pattern_id, &event.category);
        let mut pattern = entry.lock().await;
        let now = self.clock.now();

        let previous_severity = pattern.severity;
        let is_recurring = pattern.occurrence_count > 0;
        pattern.record_occurrence(event, now, &self.policy);
        self.window.lock().observe(&pattern_id, !is_recurring);

        metrics::counter!("avp_anomalies_total", "severity" => pattern.severity.as_str())
            .increment(1);
        if pattern.severity > previous_severity {
            tracing::info!(
                pattern = %pattern_id,
                occurrences = pattern.occurrence_count,
                from = %previous_severity,
                to = %pattern.severity,
                "anomaly severity raised"
            );
        } else {
            tracing::debug!(pattern = %pattern_id, occurrences = pattern.occurrence_count, "anomaly recorded");
        }

        let mut lesson_created_now = false;
        if !pattern.lesson_attempted {
            pattern.lesson_attempted = true;
            let lesson = self.synthesize_lesson(&pattern, event, now);
            let delivered = self
                .deliver("lesson", &pattern_id, self.lessons.record_lesson(lesson))
                .await;
            if let Some(lesson_id) = delivered {
                tracing::info!(pattern = %pattern_id, lesson_id = %lesson_id, "lesson recorded");
                metrics::counter!("avp_anomaly_lessons_total").increment(1);
                self.window.lock().lessons_created += 1;
                pattern.lesson_id = Some(lesson_id);
                lesson_created_now = true;
            }
        }

        let mut escalated_now = false;
        if pattern.escalation_due() {
            pattern.escalation_attempted = true;
            let payload = EscalationPayload {
                pattern_id: pattern_id.clone(),
                occurrence_count: pattern.occurrence_count,
                severity: pattern.severity,
                first_seen: pattern.first_seen,
                last_seen: pattern.last_seen,
                summary: pattern.summary(),
                lesson_id: pattern.lesson_id.clone(),
                last_source: pattern.last_source.clone(),
                last_subject: pattern.last_subject.clone(),
            };
            let delivered = self
                .deliver("escalation", &pattern_id, self.alerter.escalate(payload))
                .await;
            if let Some(reference) = delivered {
                tracing::warn!(
                    pattern = %pattern_id,
                    occurrences = pattern.occurrence_count,
                    reference = %reference,
                    "anomaly pattern escalated"
                );
                metrics::counter!("avp_anomaly_escalations_total").increment(1);
                self.window.lock().escalations += 1;
                pattern.escalation_ref = Some(reference);
                escalated_now = true;
            }
        }

        self.persist(&pattern);

        EscalationResult {
            pattern_id,
            is_recurring,
            occurrence_count: pattern.occurrence_count,
            severity: pattern.severity,
            previous_severity,
            lesson_id: pattern.lesson_id.clone(),
            escalation_ref: pattern.escalation_ref.clone(),
            lesson_created_now,
            escalated_now,
        }
    }

    /// Snapshot of one pattern
    pub async fn pattern(&self, pattern_id: &str) -> Option<AnomalyPattern> {
        let entry = self
            .patterns
            .get(pattern_id)
            .map(|e| Arc::clone(e.value()))?;
        let pattern = entry.lock().await;
        Some(pattern.clone())
    }

    /// Snapshots of every pattern, sorted by id
    pub async fn patterns(&self) -> Vec<AnomalyPattern> {
        let mut all = Vec::with_capacity(self.patterns.len());
        for entry in self.entries() {
            all.push(entry.lock().await.clone());
        }
        all.sort_by(|a, b| a.pattern_id.cmp(&b.pattern_id));
        all
    }

    /// Patterns currently at CRITICAL, sorted by id
    pub async fn critical_patterns(&self) -> Vec<AnomalyPattern> {
        let mut critical = self.patterns().await;
        critical.retain(|p| p.severity == SeverityTier::Critical);
        critical
    }

    /// Number of tracked patterns
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Check if no pattern is tracked
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Summary of the current window without resetting it
    pub async fn daily_summary(&self) -> DailySummary {
        let counters = self.window.lock().clone();
        let critical = self.critical_patterns().await;
        counters.summarize(self.clock.now(), critical)
    }

    /// Summarise and reset the window counters
    ///
    /// Per-pattern recurrence state is untouched.
    pub async fn close_window(&self) -> DailySummary {
        let now = self.clock.now();
        let counters = std::mem::replace(&mut *self.window.lock(), WindowCounters::new(now));
        let critical = self.critical_patterns().await;
        let summary = counters.summarize(now, critical);
        tracing::info!(
            total = summary.total_anomalies,
            new_patterns = summary.new_pattern_count(),
            known_patterns = summary.known_pattern_count(),
            critical = summary.critical_patterns.len(),
            "anomaly window closed"
        );
        summary
    }

    fn synthesize_lesson(
        &self,
        pattern: &AnomalyPattern,
        event: &AnomalyEvent,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Lesson {
        let entry = playbook::lookup(&pattern.pattern_id);
        let severity = event
            .reported_severity
            .map_or(pattern.severity, |reported| reported.max(pattern.severity));

        let mut tags = vec![
            "anomaly".to_string(),
            pattern.pattern_id.to_string(),
            severity.as_str().to_ascii_lowercase(),
        ];
        if let Some(source) = &event.source {
            tags.push(format!("source:{source}"));
        }
        if let Some(subject) = &event.subject {
            tags.push(format!("subject:{subject}"));
        }

        Lesson {
            pattern_id: pattern.pattern_id.clone(),
            title: format!("{} ({})", entry.title, pattern.pattern_id),
            description: event.description.clone(),
            root_cause: entry.root_cause.to_string(),
            prevention: entry.prevention.to_string(),
            severity,
            tags,
            created_at: now,
        }
    }

    /// Run a delivery with the policy timeout; failures are logged and absorbed
    async fn deliver<F>(&self, kind: &'static str, pattern_id: &PatternId, delivery: F) -> Option<String>
    where
        F: Future<Output = Result<String, DeliveryError>>,
    {
        let timeout = self.policy.delivery_timeout();
        let outcome = match tokio::time::timeout(timeout, delivery).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DeliveryError::TimedOut(self.policy.delivery_timeout_ms)),
        };
        match outcome {
            Ok(reference) => Some(reference),
            Err(err) => {
                metrics::counter!("avp_anomaly_delivery_failures_total", "kind" => kind)
                    .increment(1);
                tracing::warn!(pattern = %pattern_id, kind, error = %err, "anomaly side effect not delivered");
                None
            }
        }
    }

    fn get_or_create(&self, pattern_id: &PatternId, category: &str) -> Entry {
        let now = self.clock.now();
        let entry = self
            .patterns
            .entry(pattern_id.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(AnomalyPattern::new(
                    pattern_id.clone(),
                    category,
                    now,
                )))
            });
        Arc::clone(entry.value())
    }

    fn entries(&self) -> Vec<Entry> {
        self.patterns.iter().map(|e| Arc::clone(e.value())).collect()
    }

    fn persist(&self, pattern: &AnomalyPattern) {
        if let Some(store) = &self.store {
            if let Err(err) = store.put(pattern.pattern_id.as_str(), pattern) {
                tracing::warn!(pattern = %pattern.pattern_id, error = %err, "failed to persist anomaly pattern");
            }
        }
    }
}

impl fmt::Debug for AnomalyEscalationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnomalyEscalationEngine")
            .field("policy", &self.policy)
            .field("patterns", &self.patterns.len())
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}
