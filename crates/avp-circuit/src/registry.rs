//! Concurrent registry of source reliability records
//!
//! Each source lives behind its own mutex; operations on different sources
//! never contend beyond the map shard lookup.

use crate::config::CircuitConfig;
use crate::error::CircuitError;
use crate::state::{CircuitAction, CircuitState, SourceReliability, TripCause};
use avp_common::{RecordStore, SharedClock, StoreError};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Result of recording one outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReport {
    /// Source the outcome was recorded for
    pub source: String,
    /// State after the observation
    pub state: CircuitState,
    /// Whether the source may be used
    pub is_enabled: bool,
    /// Cumulative accuracy after the observation
    pub accuracy: f64,
    /// Transition taken, if any
    pub action_taken: CircuitAction,
}

type Entry = Arc<Mutex<SourceReliability>>;

/// Callback invoked with the record after every state transition
///
/// Runs while the source's lock is held; it must not call back into the
/// registry for the same source.
pub type TransitionHook = Arc<dyn Fn(&SourceReliability, CircuitAction) + Send + Sync>;

/// Registry of per-source circuit breakers
pub struct CircuitBreakerRegistry {
    config: CircuitConfig,
    clock: SharedClock,
    sources: DashMap<String, Entry>,
    store: Option<Arc<dyn RecordStore<SourceReliability>>>,
    on_transition: Option<TransitionHook>,
}

impl CircuitBreakerRegistry {
    /// Create empty registry
    #[must_use]
    pub fn new(config: CircuitConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            sources: DashMap::new(),
            store: None,
            on_transition: None,
        }
    }

    /// Write every mutation through to `store`
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn RecordStore<SourceReliability>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Notify `hook` of every transition, including lazy cooldown expiries
    #[must_use]
    pub fn with_transition_hook(mut self, hook: TransitionHook) -> Self {
        self.on_transition = Some(hook);
        self
    }

    /// Load persisted records, replacing any in-memory record with the same source
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
            self.sources
                .insert(record.source.clone(), Arc::new(Mutex::new(record)));
        }
        tracing::info!(count, "restored source reliability records");
        Ok(count)
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Whether checks backed by `source` may run
    ///
    /// Unknown sources are enabled. An Open circuit whose cooldown has
    /// elapsed moves to HalfOpen here.
    #[must_use]
    pub fn is_enabled(&self, source: &str) -> bool {
        self.state(source).is_enabled()
    }

    /// Current state, applying any due cooldown transition
    #[must_use]
    pub fn state(&self, source: &str) -> CircuitState {
        let Some(entry) = self.get(source) else {
            return CircuitState::Closed;
        };
        let mut record = entry.lock();
        self.refresh_locked(&mut record);
        record.state
    }

    /// Record whether the source's last signal turned out to be correct
    pub fn record_outcome(&self, source: &str, was_correct: bool) -> OutcomeReport {
        let entry = self.get_or_create(source);
        let mut record = entry.lock();
        let now = self.clock.now();

        let action = record.observe(was_correct, now, &self.config);
        if action.is_transition() {
            self.log_transition(&record, action);
        }
        metrics::counter!(
            "avp_circuit_outcomes_total",
            "correct" => if was_correct { "true" } else { "false" }
        )
        .increment(1);
        self.persist(&record);

        OutcomeReport {
            source: record.source.clone(),
            state: record.state,
            is_enabled: record.state.is_enabled(),
            accuracy: record.accuracy(),
            action_taken: action,
        }
    }

    /// Operator override: close the circuit
    ///
    /// Clears the failure run and cooldown; historical totals are kept.
    ///
    /// # Errors
    /// Returns `CircuitError::UnknownSource` if the source was never observed
    pub fn force_reset(&self, source: &str) -> Result<SourceReliability, CircuitError> {
        let entry = self
            .get(source)
            .ok_or_else(|| CircuitError::UnknownSource(source.to_string()))?;
        let mut record = entry.lock();
        record.reset(self.clock.now());
        self.log_transition(&record, CircuitAction::Reset);
        self.persist(&record);
        Ok(record.clone())
    }

    /// Open the circuit on request (operator or escalation feedback)
    ///
    /// No-op if the circuit is already Open.
    pub fn force_trip(&self, source: &str, reason: impl Into<String>) -> CircuitAction {
        let entry = self.get_or_create(source);
        let mut record = entry.lock();
        let now = self.clock.now();
        record.refresh(now);
        if record.state == CircuitState::Open {
            return CircuitAction::None;
        }

        record.trip(
            TripCause::Forced {
                reason: reason.into(),
            },
            now,
            &self.config,
        );
        self.log_transition(&record, CircuitAction::ForcedOpen);
        self.persist(&record);
        CircuitAction::ForcedOpen
    }

    /// Sources currently Open, sorted
    #[must_use]
    pub fn list_disabled(&self) -> Vec<String> {
        let mut disabled: Vec<String> = self
            .entries()
            .into_iter()
            .filter_map(|entry| {
                let mut record = entry.lock();
                self.refresh_locked(&mut record);
                if record.state.is_enabled() {
                    None
                } else {
                    Some(record.source.clone())
                }
            })
            .collect();
        disabled.sort();
        disabled
    }

    /// Snapshot of one source
    #[must_use]
    pub fn snapshot(&self, source: &str) -> Option<SourceReliability> {
        let entry = self.get(source)?;
        let mut record = entry.lock();
        self.refresh_locked(&mut record);
        Some(record.clone())
    }

    /// Snapshots of every source, sorted by source
    #[must_use]
    pub fn snapshots(&self) -> Vec<SourceReliability> {
        let mut all: Vec<SourceReliability> = self
            .entries()
            .into_iter()
            .map(|entry| {
                let mut record = entry.lock();
                self.refresh_locked(&mut record);
                record.clone()
            })
            .collect();
        all.sort_by(|a, b| a.source.cmp(&b.source));
        all
    }

    /// Number of tracked sources
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check if no source has been observed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    fn get(&self, source: &str) -> Option<Entry> {
        self.sources.get(source).map(|e| Arc::clone(e.value()))
    }

    fn get_or_create(&self, source: &str) -> Entry {
        let now = self.clock.now();
        let entry = self
            .sources
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SourceReliability::new(source, now))));
        Arc::clone(entry.value())
    }

    /// Clone out the entry handles so no shard lock is held while locking records
    fn entries(&self) -> Vec<Entry> {
        self.sources.iter().map(|e| Arc::clone(e.value())).collect()
    }

    fn refresh_locked(&self, record: &mut SourceReliability) {
        let action = record.refresh(self.clock.now());
        if action.is_transition() {
            self.log_transition(record, action);
            self.persist(record);
        }
    }

    fn log_transition(&self, record: &SourceReliability, action: CircuitAction) {
        if let Some(hook) = &self.on_transition {
            hook(record, action);
        }
        metrics::counter!("avp_circuit_transitions_total", "action" => action.as_str())
            .increment(1);
        match action {
            CircuitAction::Tripped | CircuitAction::Reopened | CircuitAction::ForcedOpen => {
                let reason = record
                    .last_trip_reason()
                    .map(|r| r.cause.to_string())
                    .unwrap_or_default();
                tracing::warn!(
                    source = %record.source,
                    %action,
                    %reason,
                    trip_count = record.trip_count,
                    cooldown_until = ?record.cooldown_until,
                    "circuit opened"
                );
            }
            _ => {
                tracing::info!(
                    source = %record.source,
                    %action,
                    state = %record.state,
                    accuracy = record.accuracy(),
                    "circuit state changed"
                );
            }
        }
    }

    fn persist(&self, record: &SourceReliability) {
        if let Some(store) = &self.store {
            if let Err(err) = store.put(&record.source, record) {
                tracing::warn!(source = %record.source, error = %err, "failed to persist source reliability");
            }
        }
    }
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("config", &self.config)
            .field("sources", &self.sources.len())
            .field("persistent", &self.store.is_some())
            .field("hooked", &self.on_transition.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avp_common::{ManualClock, MemoryStore};
    use chrono::Duration;

    fn registry() -> (CircuitBreakerRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let registry = CircuitBreakerRegistry::new(CircuitConfig::default(), clock.clone());
        (registry, clock)
    }

    #[test]
    fn unknown_source_is_enabled_and_not_created() {
        let (registry, _) = registry();
        assert!(registry.is_enabled("never_seen"));
        assert!(registry.is_empty());
    }

    #[test]
    fn record_outcome_creates_lazily() {
        let (registry, _) = registry();
        let report = registry.record_outcome("feed", true);
        assert_eq!(report.state, CircuitState::Closed);
        assert!(report.is_enabled);
        assert!((report.accuracy - 1.0).abs() < f64::EPSILON);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lazy_half_open_on_lookup() {
        let (registry, clock) = registry();
        for _ in 0..5 {
            registry.record_outcome("feed", false);
        }
        assert!(!registry.is_enabled("feed"));

        clock.advance(Duration::minutes(59));
        assert!(!registry.is_enabled("feed"));

        clock.advance(Duration::minutes(1));
        assert!(registry.is_enabled("feed"));
        assert_eq!(registry.state("feed"), CircuitState::HalfOpen);
    }

    #[test]
    fn force_reset_unknown_source() {
        let (registry, _) = registry();
        assert_eq!(
            registry.force_reset("ghost"),
            Err(CircuitError::UnknownSource("ghost".into()))
        );
    }

    #[test]
    fn force_trip_is_idempotent_while_open() {
        let (registry, _) = registry();
        assert_eq!(registry.force_trip("feed", "escalated"), CircuitAction::ForcedOpen);
        assert_eq!(registry.force_trip("feed", "again"), CircuitAction::None);
        let snap = registry.snapshot("feed").unwrap();
        assert_eq!(snap.trip_count, 1);
        assert_eq!(snap.state, CircuitState::Open);
    }

    #[test]
    fn list_disabled_is_sorted() {
        let (registry, _) = registry();
        registry.force_trip("zeta", "x");
        registry.force_trip("alpha", "x");
        registry.record_outcome("beta", true);
        assert_eq!(registry.list_disabled(), vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn writes_through_to_store() {
        let (registry, _) = registry();
        let store: Arc<MemoryStore<SourceReliability>> = Arc::new(MemoryStore::new());
        let registry = registry.with_store(store.clone());

        registry.record_outcome("feed", false);
        assert_eq!(store.get("feed").unwrap().total_observations, 1);

        registry.force_trip("feed", "manual");
        assert_eq!(store.get("feed").unwrap().state, CircuitState::Open);
    }

    #[test]
    fn hook_sees_every_transition_including_lazy_ones() {
        let (registry, clock) = registry();
        let seen: Arc<Mutex<Vec<(String, CircuitAction)>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let registry = registry.with_transition_hook(Arc::new(move |record: &SourceReliability, action: CircuitAction| {
            sink.lock().push((record.source.clone(), action));
        }));

        for _ in 0..5 {
            registry.record_outcome("feed", false);
        }
        clock.advance(Duration::minutes(60));
        assert!(registry.is_enabled("feed"));
        assert!(registry.is_enabled("feed"));

        assert_eq!(
            *seen.lock(),
            vec![
                ("feed".to_string(), CircuitAction::Tripped),
                ("feed".to_string(), CircuitAction::HalfOpened),
            ]
        );
    }

    #[test]
    fn restore_from_store() {
        let clock = Arc::new(ManualClock::starting_now());
        let store: Arc<MemoryStore<SourceReliability>> = Arc::new(MemoryStore::new());
        {
            let registry = CircuitBreakerRegistry::new(CircuitConfig::default(), clock.clone())
                .with_store(store.clone());
            registry.force_trip("feed", "manual");
        }

        let registry = CircuitBreakerRegistry::new(CircuitConfig::default(), clock)
            .with_store(store);
        assert_eq!(registry.restore().unwrap(), 1);
        assert!(!registry.is_enabled("feed"));
    }
}
