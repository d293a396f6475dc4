//! Per-source reliability record and its state machine
//!
//! ```text
//!            consecutive failures >= limit
//!            or accuracy < threshold (after min observations)
//!   Closed ─────────────────────────────────────────────▶ Open
//!     ▲                                                   │  ▲
//!     │ half_open_test_count clean observations           │  │ any failure
//!     │                                   now >= cooldown │  │
//!     └──────────────────────── HalfOpen ◀────────────────┘  │
//!                                  └─────────────────────────┘
//! ```

use crate::config::CircuitConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Source used normally
    #[default]
    Closed,
    /// Source excluded from aggregation
    Open,
    /// Source on trial after cooldown
    HalfOpen,
}

impl CircuitState {
    /// Whether checks backed by this source may run
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Open)
    }

    /// Lower-case label
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition caused by a lookup, observation or operator command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitAction {
    /// No state change
    #[default]
    None,
    /// Closed → Open
    Tripped,
    /// Open → HalfOpen after cooldown
    HalfOpened,
    /// HalfOpen → Closed after a clean trial run
    Recovered,
    /// HalfOpen → Open on a failed trial observation
    Reopened,
    /// Operator reset to Closed
    Reset,
    /// Opened by an operator or escalation
    ForcedOpen,
}

impl CircuitAction {
    /// Lower-case label
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Tripped => "tripped",
            Self::HalfOpened => "half_opened",
            Self::Recovered => "recovered",
            Self::Reopened => "reopened",
            Self::Reset => "reset",
            Self::ForcedOpen => "forced_open",
        }
    }

    /// Whether the state changed
    #[inline]
    #[must_use]
    pub fn is_transition(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for CircuitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a circuit opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum TripCause {
    /// Too many failures in a row
    ConsecutiveFailures {
        /// Failures observed in a row
        count: u32,
    },
    /// Cumulative accuracy fell below the threshold
    LowAccuracy {
        /// Accuracy at trip time
        accuracy: f64,
        /// Observations at trip time
        observations: u64,
    },
    /// A trial observation failed while half-open
    HalfOpenTestFailed,
    /// Opened on request
    Forced {
        /// Caller-supplied reason
        reason: String,
    },
}

impl fmt::Display for TripCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConsecutiveFailures { count } => write!(f, "{count} consecutive failures"),
            Self::LowAccuracy {
                accuracy,
                observations,
            } => write!(
                f,
                "accuracy {:.1}% over {observations} observations",
                accuracy * 100.0
            ),
            Self::HalfOpenTestFailed => f.write_str("trial observation failed while half-open"),
            Self::Forced { reason } => write!(f, "forced: {reason}"),
        }
    }
}

/// Timestamped trip reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripReason {
    /// When the circuit opened
    pub at: DateTime<Utc>,
    /// Why
    #[serde(flatten)]
    pub cause: TripCause,
}

/// Reliability record for one signal source
///
/// Created on first observation, never deleted. Historical totals survive
/// operator resets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReliability {
    /// Source identifier
    pub source: String,
    /// Current state
    pub state: CircuitState,
    /// All observations ever recorded
    pub total_observations: u64,
    /// Observations that were correct
    pub correct_observations: u64,
    /// Current run of failures
    pub consecutive_failures: u32,
    /// Clean observations since entering HalfOpen
    pub half_open_successes: u32,
    /// Last failed observation
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Times the circuit has opened
    pub trip_count: u32,
    /// Earliest instant an Open circuit may go half-open
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Most recent trip reasons, oldest first
    pub trip_reasons: VecDeque<TripReason>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// Last state change
    pub last_transition_at: DateTime<Utc>,
}

impl SourceReliability {
    /// Create a fresh Closed record
    #[must_use]
    pub fn new(source: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            state: CircuitState::Closed,
            total_observations: 0,
            correct_observations: 0,
            consecutive_failures: 0,
            half_open_successes: 0,
            last_failure_at: None,
            trip_count: 0,
            cooldown_until: None,
            trip_reasons: VecDeque::new(),
            created_at: now,
            last_transition_at: now,
        }
    }

    /// Cumulative accuracy; `1.0` before any observation
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn accuracy(&self) -> f64 {
        if self.total_observations == 0 {
            return 1.0;
        }
        self.correct_observations as f64 / self.total_observations as f64
    }

    /// Most recent trip reason
    #[inline]
    #[must_use]
    pub fn last_trip_reason(&self) -> Option<&TripReason> {
        self.trip_reasons.back()
    }

    /// Apply the lazy Open → HalfOpen transition
    pub(crate) fn refresh(&mut self, now: DateTime<Utc>) -> CircuitAction {
        if self.state != CircuitState::Open {
            return CircuitAction::None;
        }
        match self.cooldown_until {
            Some(until) if now < until => CircuitAction::None,
            _ => {
                self.state = CircuitState::HalfOpen;
                self.half_open_successes = 0;
                self.last_transition_at = now;
                CircuitAction::HalfOpened
            }
        }
    }

    /// Record one observation and apply any resulting transition
    pub(crate) fn observe(
        &mut self,
        was_correct: bool,
        now: DateTime<Utc>,
        config: &CircuitConfig,
    ) -> CircuitAction {
        let refreshed = self.refresh(now);

        self.total_observations += 1;
        if was_correct {
            self.correct_observations += 1;
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.last_failure_at = Some(now);
        }

        let action = match self.state {
            CircuitState::Closed => self.closed_trip_check(was_correct, now, config),
            CircuitState::Open => CircuitAction::None,
            CircuitState::HalfOpen if !was_correct => {
                self.trip(TripCause::HalfOpenTestFailed, now, config);
                CircuitAction::Reopened
            }
            CircuitState::HalfOpen => {
                self.half_open_successes = self.half_open_successes.saturating_add(1);
                if self.consecutive_failures == 0
                    && self.half_open_successes >= config.half_open_test_count
                {
                    self.state = CircuitState::Closed;
                    self.half_open_successes = 0;
                    self.cooldown_until = None;
                    self.last_transition_at = now;
                    CircuitAction::Recovered
                } else {
                    CircuitAction::None
                }
            }
        };

        if action.is_transition() {
            action
        } else {
            refreshed
        }
    }

    /// Trip rules while Closed
    ///
    /// The failure-run limit only applies to a failing observation; the
    /// accuracy floor applies after every observation once enough exist.
    fn closed_trip_check(
        &mut self,
        was_correct: bool,
        now: DateTime<Utc>,
        config: &CircuitConfig,
    ) -> CircuitAction {
        if !was_correct && self.consecutive_failures >= config.consecutive_failure_limit {
            let count = self.consecutive_failures;
            self.trip(TripCause::ConsecutiveFailures { count }, now, config);
            return CircuitAction::Tripped;
        }

        let accuracy = self.accuracy();
        if self.total_observations >= config.min_observations_for_trip
            && accuracy < config.accuracy_threshold
        {
            let observations = self.total_observations;
            self.trip(
                TripCause::LowAccuracy {
                    accuracy,
                    observations,
                },
                now,
                config,
            );
            return CircuitAction::Tripped;
        }

        CircuitAction::None
    }

    /// Open the circuit with a fresh cooldown
    pub(crate) fn trip(&mut self, cause: TripCause, now: DateTime<Utc>, config: &CircuitConfig) {
        self.state = CircuitState::Open;
        self.trip_count = self.trip_count.saturating_add(1);
        self.half_open_successes = 0;
        self.cooldown_until = Some(now + config.cooldown());
        self.last_transition_at = now;

        self.trip_reasons.push_back(TripReason { at: now, cause });
        while self.trip_reasons.len() > config.trip_reason_capacity {
            self.trip_reasons.pop_front();
        }
    }

    /// Operator reset: Closed, failure run cleared, totals kept
    pub(crate) fn reset(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.half_open_successes = 0;
        self.cooldown_until = None;
        self.last_transition_at = now;
    }
}
