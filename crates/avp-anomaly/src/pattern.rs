use crate::event::{AnomalyEvent, PatternId};
use crate::policy::EscalationPolicy;
use avp_common::SeverityTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cumulative recurrence state of one pattern
///
/// Never deleted; severity never decreases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyPattern {
    /// Stable key
    pub pattern_id: PatternId,
    /// Category as first reported
    pub category: String,
    /// First occurrence
    pub first_seen: DateTime<Utc>,
    /// Latest occurrence
    pub last_seen: DateTime<Utc>,
    /// Cumulative occurrences
    pub occurrence_count: u64,
    /// Current tier
    pub severity: SeverityTier,
    /// Lesson recorded on first sighting
    #[serde(default)]
    pub lesson_id: Option<String>,
    /// External alert or ticket reference
    #[serde(default)]
    pub escalation_ref: Option<String>,
    /// Lesson delivery was attempted (successfully or not)
    #[serde(default)]
    pub lesson_attempted: bool,
    /// Escalation delivery was attempted (successfully or not)
    #[serde(default)]
    pub escalation_attempted: bool,
    /// Source named by the latest event
    #[serde(default)]
    pub last_source: Option<String>,
    /// Subject named by the latest event
    #[serde(default)]
    pub last_subject: Option<String>,
}

impl AnomalyPattern {
    /// Create an unseen pattern
    #[must_use]
    pub fn new(pattern_id: PatternId, category: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            pattern_id,
            category: category.into(),
            first_seen: now,
            last_seen: now,
            occurrence_count: 0,
            severity: SeverityTier::Low,
            lesson_id: None,
            escalation_ref: None,
            lesson_attempted: false,
            escalation_attempted: false,
            last_source: None,
            last_subject: None,
        }
    }

    /// Count one occurrence and re-derive severity
    pub(crate) fn record_occurrence(
        &mut self,
        event: &AnomalyEvent,
        now: DateTime<Utc>,
        policy: &EscalationPolicy,
    ) {
        if self.occurrence_count == 0 {
            self.first_seen = now;
        }
        self.occurrence_count = self.occurrence_count.saturating_add(1);
        self.last_seen = now;
        self.severity = self.severity.max(policy.tier_for(self.occurrence_count));
        if event.source.is_some() {
            self.last_source.clone_from(&event.source);
        }
        if event.subject.is_some() {
            self.last_subject.clone_from(&event.subject);
        }
    }

    /// Whether the CRITICAL escalation is still owed
    #[inline]
    #[must_use]
    pub(crate) fn escalation_due(&self) -> bool {
        self.severity == SeverityTier::Critical
            && !self.escalation_attempted
            && self.escalation_ref.is_none()
    }

    /// One-line description used in alerts and logs
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} occurred {} times between {} and {} (severity {})",
            self.pattern_id,
            self.occurrence_count,
            self.first_seen.to_rfc3339(),
            self.last_seen.to_rfc3339(),
            self.severity
        )
    }
}

/// Outcome of processing one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationResult {
    /// Pattern the event belongs to
    pub pattern_id: PatternId,
    /// False only on the pattern's first occurrence
    pub is_recurring: bool,
    /// Cumulative occurrences including this one
    pub occurrence_count: u64,
    /// Severity after this occurrence
    pub severity: SeverityTier,
    /// Severity before this occurrence
    pub previous_severity: SeverityTier,
    /// Lesson reference, if one exists
    pub lesson_id: Option<String>,
    /// Escalation reference, if one exists
    pub escalation_ref: Option<String>,
    /// A lesson was recorded by this call
    pub lesson_created_now: bool,
    /// The external escalation was delivered by this call
    pub escalated_now: bool,
}

impl EscalationResult {
    /// Whether this occurrence raised the severity tier
    #[inline]
    #[must_use]
    pub fn severity_raised(&self) -> bool {
        self.severity > self.previous_severity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occurrences_raise_severity_monotonically() {
        let policy = EscalationPolicy::default();
        let now = Utc::now();
        let event = AnomalyEvent::new("price_gap", "gap at open").with_source("quotes");
        let mut pattern = AnomalyPattern::new(event.pattern_id(), &event.category, now);

        let mut last = SeverityTier::Low;
        for _ in 0..10 {
            pattern.record_occurrence(&event, now, &policy);
            assert!(pattern.severity >= last);
            last = pattern.severity;
        }
        assert_eq!(pattern.occurrence_count, 10);
        assert_eq!(pattern.severity, SeverityTier::Critical);
        assert_eq!(pattern.last_source.as_deref(), Some("quotes"));
    }

    #[test]
    fn escalation_due_only_once_attempted_flag_unset() {
        let mut pattern = AnomalyPattern::new(PatternId::from_category("x"), "x", Utc::now());
        pattern.severity = SeverityTier::Critical;
        assert!(pattern.escalation_due());
        pattern.escalation_attempted = true;
        assert!(!pattern.escalation_due());
    }

    #[test]
    fn missing_source_keeps_previous() {
        let policy = EscalationPolicy::default();
        let now = Utc::now();
        let mut pattern = AnomalyPattern::new(PatternId::from_category("x"), "x", now);
        pattern.record_occurrence(&AnomalyEvent::new("x", "a").with_source("feed"), now, &policy);
        pattern.record_occurrence(&AnomalyEvent::new("x", "b"), now, &policy);
        assert_eq!(pattern.last_source.as_deref(), Some("feed"));
    }
}
