//! Outbound side effects: lesson capture and external alerting
//!
//! Delivery is deliver-or-log-failure. The engine bounds each call with a
//! timeout and never lets a failure touch recurrence state.

use crate::error::DeliveryError;
use crate::event::PatternId;
use avp_common::SeverityTier;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable lesson synthesised on a pattern's first occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    /// Pattern the lesson describes
    pub pattern_id: PatternId,
    /// Short title
    pub title: String,
    /// What happened
    pub description: String,
    /// Inferred root cause
    pub root_cause: String,
    /// Suggested prevention
    pub prevention: String,
    /// Severity at capture time
    pub severity: SeverityTier,
    /// Retrieval tags
    pub tags: Vec<String>,
    /// Capture time
    pub created_at: DateTime<Utc>,
}

/// Structured alert for a pattern entering CRITICAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPayload {
    /// Pattern key
    pub pattern_id: PatternId,
    /// Occurrences so far
    pub occurrence_count: u64,
    /// Severity (always CRITICAL on delivery)
    pub severity: SeverityTier,
    /// First occurrence
    pub first_seen: DateTime<Utc>,
    /// Latest occurrence
    pub last_seen: DateTime<Utc>,
    /// Human-readable summary
    pub summary: String,
    /// Lesson recorded for the pattern, if any
    pub lesson_id: Option<String>,
    /// Source named by the latest event
    pub last_source: Option<String>,
    /// Subject named by the latest event
    pub last_subject: Option<String>,
}

/// Knowledge store receiving first-seen lessons
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LessonSink: Send + Sync {
    /// Store a lesson and return its identifier
    async fn record_lesson(&self, lesson: Lesson) -> Result<String, DeliveryError>;
}

/// External alerting channel (ticketing, chat, paging)
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Alerter: Send + Sync {
    /// Deliver an escalation and return the external reference
    async fn escalate(&self, payload: EscalationPayload) -> Result<String, DeliveryError>;
}

/// Alerter that writes escalations to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlerter;

#[async_trait::async_trait]
impl Alerter for TracingAlerter {
    async fn escalate(&self, payload: EscalationPayload) -> Result<String, DeliveryError> {
        let reference = format!("log-{}", Uuid::new_v4());
        tracing::error!(
            pattern = %payload.pattern_id,
            occurrences = payload.occurrence_count,
            severity = %payload.severity,
            reference = %reference,
            summary = %payload.summary,
            "anomaly escalated"
        );
        Ok(reference)
    }
}

/// In-process lesson store
#[derive(Debug, Default)]
pub struct MemoryLessonBook {
    lessons: Mutex<Vec<(String, Lesson)>>,
}

impl MemoryLessonBook {
    /// Create empty book
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded lessons with their identifiers, in recording order
    #[must_use]
    pub fn lessons(&self) -> Vec<(String, Lesson)> {
        self.lessons.lock().clone()
    }

    /// Number of recorded lessons
    #[must_use]
    pub fn len(&self) -> usize {
        self.lessons.lock().len()
    }

    /// Check if nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lessons.lock().is_empty()
    }
}

#[async_trait::async_trait]
impl LessonSink for MemoryLessonBook {
    async fn record_lesson(&self, lesson: Lesson) -> Result<String, DeliveryError> {
        let id = format!("lesson-{}", Uuid::new_v4());
        tracing::debug!(lesson_id = %id, pattern = %lesson.pattern_id, "lesson recorded");
        self.lessons.lock().push((id.clone(), lesson));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson() -> Lesson {
        Lesson {
            pattern_id: PatternId::from_category("duplicate_order"),
            title: "Duplicate order submitted".into(),
            description: "retry resubmitted order".into(),
            root_cause: "ambiguous timeout".into(),
            prevention: "idempotent ids".into(),
            severity: SeverityTier::Low,
            tags: vec!["anomaly".into()],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn memory_book_records_in_order() {
        let book = MemoryLessonBook::new();
        let first = book.record_lesson(lesson()).await.unwrap();
        let second = book.record_lesson(lesson()).await.unwrap();
        assert_ne!(first, second);
        let lessons = book.lessons();
        assert_eq!(lessons.len(), 2);
        assert_eq!(lessons[0].0, first);
    }

    #[tokio::test]
    async fn tracing_alerter_returns_reference() {
        let payload = EscalationPayload {
            pattern_id: PatternId::from_category("price_gap"),
            occurrence_count: 7,
            severity: SeverityTier::Critical,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            summary: "price_gap occurred 7 times".into(),
            lesson_id: None,
            last_source: None,
            last_subject: None,
        };
        let reference = TracingAlerter.escalate(payload).await.unwrap();
        assert!(reference.starts_with("log-"));
    }
}
