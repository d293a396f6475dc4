use crate::event::PatternId;
use crate::pattern::AnomalyPattern;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Window-scoped counters; reset by closing the window
#[derive(Debug, Clone)]
pub(crate) struct WindowCounters {
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) total_anomalies: u64,
    pub(crate) new_patterns: BTreeSet<PatternId>,
    pub(crate) known_patterns: BTreeSet<PatternId>,
    pub(crate) lessons_created: u64,
    pub(crate) escalations: u64,
}

impl WindowCounters {
    pub(crate) fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            total_anomalies: 0,
            new_patterns: BTreeSet::new(),
            known_patterns: BTreeSet::new(),
            lessons_created: 0,
            escalations: 0,
        }
    }

    /// Count one occurrence
    ///
    /// A pattern first seen in this window stays "new" even if it recurs.
    pub(crate) fn observe(&mut self, pattern: &PatternId, first_occurrence: bool) {
        self.total_anomalies += 1;
        if first_occurrence {
            self.new_patterns.insert(pattern.clone());
        } else if !self.new_patterns.contains(pattern) {
            self.known_patterns.insert(pattern.clone());
        }
    }

    pub(crate) fn summarize(
        &self,
        window_end: DateTime<Utc>,
        critical_patterns: Vec<AnomalyPattern>,
    ) -> DailySummary {
        DailySummary {
            window_start: self.started_at,
            window_end,
            total_anomalies: self.total_anomalies,
            new_patterns: self.new_patterns.iter().cloned().collect(),
            known_patterns: self.known_patterns.iter().cloned().collect(),
            lessons_created: self.lessons_created,
            escalations: self.escalations,
            critical_patterns,
        }
    }
}

/// Summary of one reporting window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    /// Window opening time
    pub window_start: DateTime<Utc>,
    /// Summary time
    pub window_end: DateTime<Utc>,
    /// Events processed in the window
    pub total_anomalies: u64,
    /// Patterns seen for the first time in the window, sorted
    pub new_patterns: Vec<PatternId>,
    /// Previously known patterns that recurred in the window, sorted
    pub known_patterns: Vec<PatternId>,
    /// Lessons recorded in the window
    pub lessons_created: u64,
    /// Escalations delivered in the window
    pub escalations: u64,
    /// Every pattern currently at CRITICAL, sorted by id
    pub critical_patterns: Vec<AnomalyPattern>,
}

impl DailySummary {
    /// Number of first-seen patterns
    #[inline]
    #[must_use]
    pub fn new_pattern_count(&self) -> usize {
        self.new_patterns.len()
    }

    /// Number of recurring known patterns
    #[inline]
    #[must_use]
    pub fn known_pattern_count(&self) -> usize {
        self.known_patterns.len()
    }
}
