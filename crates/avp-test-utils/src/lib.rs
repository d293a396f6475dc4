//! Testing utilities for the AVP workspace
//!
//! Scripted risk checks, recording collaborators and action fixtures.

#![allow(missing_docs)]

use avp_anomaly::{Alerter, DeliveryError, EscalationPayload, Lesson, LessonSink};
use avp_common::{Action, ActionKind, RecordStore, StoreError};
use avp_risk::{CheckContext, CheckError, RiskCheck, RiskCheckResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub fn buy(symbol: &str, notional: f64) -> Action {
    Action::new(symbol, ActionKind::Buy, notional)
}

pub fn sell(symbol: &str, notional: f64) -> Action {
    Action::new(symbol, ActionKind::Sell, notional)
}

/// Check returning a fixed score and verdict
#[derive(Debug, Clone)]
pub struct StaticCheck {
    name: String,
    source: String,
    score: f64,
    passed: bool,
    weight: f64,
    calls: Arc<AtomicUsize>,
}

impl StaticCheck {
    pub fn passing(name: &str, score: f64) -> Self {
        Self::new(name, score, true)
    }

    pub fn failing(name: &str, score: f64) -> Self {
        Self::new(name, score, false)
    }

    fn new(name: &str, score: f64, passed: bool) -> Self {
        Self {
            name: name.to_string(),
            source: name.to_string(),
            score,
            passed,
            weight: 1.0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Shared call counter, readable after the check is moved into an aggregator
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn shared(self) -> Arc<dyn RiskCheck> {
        Arc::new(self)
    }
}

#[async_trait::async_trait]
impl RiskCheck for StaticCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn evaluate(
        &self,
        _action: &Action,
        _context: &CheckContext,
    ) -> Result<RiskCheckResult, CheckError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.passed {
            RiskCheckResult::pass(&self.name, self.score)
        } else {
            RiskCheckResult::fail(&self.name, self.score).with_warning(format!("{} flagged", self.name))
        };
        Ok(result)
    }
}

/// Check that always errors with `CheckError::Unavailable`
#[derive(Debug, Clone)]
pub struct FailingCheck {
    name: String,
    degraded_score: f64,
}

impl FailingCheck {
    pub fn new(name: &str, degraded_score: f64) -> Self {
        Self {
            name: name.to_string(),
            degraded_score,
        }
    }

    pub fn shared(self) -> Arc<dyn RiskCheck> {
        Arc::new(self)
    }
}

#[async_trait::async_trait]
impl RiskCheck for FailingCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn degraded_score(&self) -> f64 {
        self.degraded_score
    }

    async fn evaluate(
        &self,
        _action: &Action,
        _context: &CheckContext,
    ) -> Result<RiskCheckResult, CheckError> {
        Err(CheckError::Unavailable(format!("{} backend offline", self.name)))
    }
}

/// Check that sleeps before answering
#[derive(Debug, Clone)]
pub struct SlowCheck {
    name: String,
    delay: Duration,
    score: f64,
}

impl SlowCheck {
    pub fn new(name: &str, delay: Duration, score: f64) -> Self {
        Self {
            name: name.to_string(),
            delay,
            score,
        }
    }

    pub fn shared(self) -> Arc<dyn RiskCheck> {
        Arc::new(self)
    }
}

#[async_trait::async_trait]
impl RiskCheck for SlowCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(
        &self,
        _action: &Action,
        _context: &CheckContext,
    ) -> Result<RiskCheckResult, CheckError> {
        tokio::time::sleep(self.delay).await;
        Ok(RiskCheckResult::pass(&self.name, self.score))
    }
}

/// Check that panics mid-evaluation
#[derive(Debug, Clone)]
pub struct PanickingCheck {
    name: String,
}

impl PanickingCheck {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn shared(self) -> Arc<dyn RiskCheck> {
        Arc::new(self)
    }
}

#[async_trait::async_trait]
impl RiskCheck for PanickingCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(
        &self,
        _action: &Action,
        _context: &CheckContext,
    ) -> Result<RiskCheckResult, CheckError> {
        panic!("{} hit an invariant violation", self.name);
    }
}

/// Check whose score is read from the action's context under its own name
///
/// Missing or non-numeric entries score 0.
#[derive(Debug, Clone)]
pub struct ContextScoreCheck {
    name: String,
    weight: f64,
}

impl ContextScoreCheck {
    pub fn new(name: &str, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            weight,
        }
    }

    pub fn shared(self) -> Arc<dyn RiskCheck> {
        Arc::new(self)
    }
}

#[async_trait::async_trait]
impl RiskCheck for ContextScoreCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn evaluate(
        &self,
        _action: &Action,
        context: &CheckContext,
    ) -> Result<RiskCheckResult, CheckError> {
        let score = context
            .attribute(&self.name)
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0);
        Ok(RiskCheckResult::pass(&self.name, score))
    }
}

/// Lesson sink that records everything it receives
#[derive(Debug, Default)]
pub struct RecordingLessonSink {
    lessons: Mutex<Vec<Lesson>>,
}

impl RecordingLessonSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.lessons.lock().len()
    }

    pub fn lessons(&self) -> Vec<Lesson> {
        self.lessons.lock().clone()
    }
}

#[async_trait::async_trait]
impl LessonSink for RecordingLessonSink {
    async fn record_lesson(&self, lesson: Lesson) -> Result<String, DeliveryError> {
        let mut lessons = self.lessons.lock();
        lessons.push(lesson);
        Ok(format!("lesson-{}", lessons.len()))
    }
}

/// Alerter that records payloads, optionally failing every delivery
#[derive(Debug, Default)]
pub struct RecordingAlerter {
    payloads: Mutex<Vec<EscalationPayload>>,
    fail: bool,
}

impl RecordingAlerter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            payloads: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn count(&self) -> usize {
        self.payloads.lock().len()
    }

    pub fn payloads(&self) -> Vec<EscalationPayload> {
        self.payloads.lock().clone()
    }
}

#[async_trait::async_trait]
impl Alerter for RecordingAlerter {
    async fn escalate(&self, payload: EscalationPayload) -> Result<String, DeliveryError> {
        let mut payloads = self.payloads.lock();
        payloads.push(payload);
        if self.fail {
            return Err(DeliveryError::Unavailable("pager offline".into()));
        }
        Ok(format!("TICKET-{}", payloads.len()))
    }
}

/// Store that rejects every write and holds nothing
#[derive(Debug, Default)]
pub struct FailingStore {
    attempts: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl<R> RecordStore<R> for FailingStore {
    fn put(&self, key: &str, _record: &R) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Io {
            path: PathBuf::from(format!("/unwritable/{key}.json")),
            source: std::io::Error::other("read-only file system"),
        })
    }

    fn load_all(&self) -> Result<Vec<R>, StoreError> {
        Ok(Vec::new())
    }
}
