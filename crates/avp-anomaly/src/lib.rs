//! AVP Anomaly - recurrence tracking and escalation
//!
//! Turns repeated problems into rising severity:
//! - first sighting of a pattern records a lesson through a [`LessonSink`]
//! - recurrence raises the [`SeverityTier`](avp_common::SeverityTier) per [`EscalationPolicy`]
//! - the transition into CRITICAL notifies an [`Alerter`] exactly once
//!
//! Recurrence is cumulative. Only the [`DailySummary`] window is ever reset.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod collaborators;
mod engine;
mod error;
mod event;
mod pattern;
mod playbook;
mod policy;
mod window;

pub use collaborators::{
    Alerter, EscalationPayload, Lesson, LessonSink, MemoryLessonBook, TracingAlerter,
};
pub use engine::AnomalyEscalationEngine;
pub use error::{AnomalyError, DeliveryError};
pub use event::{AnomalyEvent, PatternId};
pub use pattern::{AnomalyPattern, EscalationResult};
pub use playbook::{lookup as playbook_entry, PlaybookEntry, KNOWN_CATEGORIES};
pub use policy::EscalationPolicy;
pub use window::DailySummary;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
