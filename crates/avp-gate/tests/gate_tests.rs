//! End-to-end behaviour of the safety gate facade

use avp_circuit::{CircuitAction, CircuitState};
use avp_common::{ManualClock, SeverityTier};
use avp_gate::{
    AnomalyEvent, AuditKind, CompletionPolicy, GateConfig, GateError, SafetyGate,
};
use avp_test_utils::{buy, RecordingAlerter, RecordingLessonSink, SlowCheck, StaticCheck};
use chrono::Duration;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use uuid::Uuid;

struct Harness {
    gate: SafetyGate,
    clock: Arc<ManualClock>,
    lessons: Arc<RecordingLessonSink>,
    alerter: Arc<RecordingAlerter>,
}

fn harness(config: GateConfig, checks: Vec<StaticCheck>) -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let lessons = RecordingLessonSink::new();
    let alerter = RecordingAlerter::new();
    let gate = SafetyGate::builder(config)
        .with_clock(clock.clone())
        .with_checks(checks.into_iter().map(StaticCheck::shared))
        .with_lesson_sink(lessons.clone())
        .with_alerter(alerter.clone())
        .build()
        .unwrap();
    Harness {
        gate,
        clock,
        lessons,
        alerter,
    }
}

#[tokio::test]
async fn scenario_single_check_approves() {
    let h = harness(
        GateConfig::default(),
        vec![StaticCheck::passing("momentum", 10.0)],
    );

    let decision = h.gate.evaluate(&buy("AAPL", 10_000.0)).await.unwrap();

    assert_eq!(decision.risk_score, 10.0);
    assert!(decision.approved);
    assert!(decision.recommendation.contains("APPROVED"));
}

#[tokio::test]
async fn scenario_two_failing_checks_block() {
    let h = harness(
        GateConfig::default(),
        vec![
            StaticCheck::failing("similar_losses", 80.0),
            StaticCheck::failing("position_check", 90.0),
        ],
    );

    let decision = h.gate.evaluate(&buy("TSLA", 10_000.0)).await.unwrap();

    assert_eq!(decision.risk_score, 85.0);
    assert!(!decision.approved);
    assert!(decision.recommendation.contains("BLOCK"));
    assert!(decision.recommendation.contains("similar_losses"));
    assert!(decision.recommendation.contains("position_check"));
}

#[tokio::test]
async fn scenario_circuit_trips_and_recovers() {
    let h = harness(GateConfig::default(), Vec::new());

    for _ in 0..5 {
        h.gate.record_outcome("news_sentiment", false);
    }
    assert!(!h.gate.is_enabled("news_sentiment"));
    assert_eq!(h.gate.list_disabled(), vec!["news_sentiment".to_string()]);

    h.clock.advance(Duration::minutes(61));
    assert!(h.gate.is_enabled("news_sentiment"));
    assert_eq!(h.gate.source_state("news_sentiment"), CircuitState::HalfOpen);

    for _ in 0..3 {
        h.gate.record_outcome("news_sentiment", true);
    }
    assert!(h.gate.is_enabled("news_sentiment"));
    assert_eq!(h.gate.source_state("news_sentiment"), CircuitState::Closed);
}

#[tokio::test]
async fn scenario_seven_reports_escalate_once() {
    let h = harness(GateConfig::default(), Vec::new());
    let event = AnomalyEvent::new("position_mismatch", "broker shows 0 shares, local shows 100");

    let mut results = Vec::new();
    for _ in 0..7 {
        results.push(h.gate.report_anomaly(&event).await);
    }

    assert_eq!(h.lessons.count(), 1);
    assert_eq!(h.alerter.count(), 1);
    assert!(results[0].lesson_created_now);
    assert_eq!(results[1].severity, SeverityTier::Low);
    assert_eq!(results[2].severity, SeverityTier::Medium);
    assert_eq!(results[5].severity, SeverityTier::High);
    let last = &results[6];
    assert_eq!(last.occurrence_count, 7);
    assert_eq!(last.severity, SeverityTier::Critical);
    assert!(last.escalated_now);
    assert_eq!(h.alerter.payloads()[0].occurrence_count, 7);

    let again = h.gate.report_anomaly(&event).await;
    assert_eq!(again.escalation_ref, last.escalation_ref);
    assert_eq!(h.alerter.count(), 1);
}

#[tokio::test]
async fn failed_alert_delivery_keeps_count() {
    let clock = Arc::new(ManualClock::starting_now());
    let alerter = RecordingAlerter::failing();
    let gate = SafetyGate::builder(GateConfig::default())
        .with_clock(clock)
        .with_alerter(alerter.clone())
        .build()
        .unwrap();
    let event = AnomalyEvent::new("broker_timeout", "no ack");

    let mut last = None;
    for _ in 0..9 {
        last = Some(gate.report_anomaly(&event).await);
    }
    let last = last.unwrap();

    assert_eq!(last.occurrence_count, 9);
    assert_eq!(last.severity, SeverityTier::Critical);
    assert!(last.escalation_ref.is_none());
    assert_eq!(alerter.count(), 1);
}

#[tokio::test]
async fn resolving_harmful_approvals_trips_passing_sources() {
    let h = harness(
        GateConfig::default(),
        vec![
            StaticCheck::passing("momentum", 10.0),
            StaticCheck::failing("contrarian", 40.0),
        ],
    );

    for _ in 0..5 {
        let decision = h.gate.evaluate(&buy("AMD", 5_000.0)).await.unwrap();
        assert!(decision.approved);
        let reports = h.gate.resolve_decision(decision.decision_id, true).await.unwrap();
        assert_eq!(reports.len(), 2);
    }

    // momentum passed harmful actions five times; contrarian flagged them
    assert!(!h.gate.is_enabled("momentum"));
    assert!(h.gate.is_enabled("contrarian"));
    let contrarian = h.gate.source_snapshot("contrarian").unwrap();
    assert_eq!(contrarian.correct_observations, 5);

    let decision = h.gate.evaluate(&buy("AMD", 5_000.0)).await.unwrap();
    assert_eq!(decision.skipped_checks, vec!["momentum".to_string()]);
    assert_eq!(decision.risk_score, 40.0);
}

#[tokio::test]
async fn decisions_resolve_once() {
    let h = harness(
        GateConfig::default(),
        vec![StaticCheck::passing("momentum", 10.0)],
    );
    let decision = h.gate.evaluate(&buy("AAPL", 1_000.0)).await.unwrap();

    h.gate.resolve_decision(decision.decision_id, false).await.unwrap();
    let err = h
        .gate
        .resolve_decision(decision.decision_id, false)
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::UnknownDecision(id) if id == decision.decision_id));

    let err = h.gate.resolve_decision(Uuid::new_v4(), true).await.unwrap_err();
    assert!(err.is_input_error());
}

#[tokio::test]
async fn degraded_results_are_not_resolved() {
    let clock = Arc::new(ManualClock::starting_now());
    let mut config = GateConfig::default();
    config.aggregator.check_timeout_ms = 20;
    let gate = SafetyGate::builder(config)
        .with_clock(clock)
        .with_check(SlowCheck::new("vector_search", std::time::Duration::from_secs(5), 0.0).shared())
        .with_check(StaticCheck::passing("momentum", 10.0).shared())
        .build()
        .unwrap();

    let decision = gate.evaluate(&buy("NVDA", 1_000.0)).await.unwrap();
    let reports = gate.resolve_decision(decision.decision_id, false).await.unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].source, "momentum");
    assert!(gate.source_snapshot("vector_search").is_none());
}

#[tokio::test]
async fn critical_anomaly_trips_named_source() {
    let h = harness(
        GateConfig::default(),
        vec![StaticCheck::failing("quotes", 90.0), StaticCheck::passing("depth", 10.0)],
    );
    let event = AnomalyEvent::new("stale_market_data", "quote 45s old").with_source("quotes");

    for i in 1..=5 {
        let result = h.gate.report_anomaly(&event).await;
        let expected = i < 5;
        assert_eq!(h.gate.is_enabled("quotes"), expected, "after report {i}");
        if i == 5 {
            assert_eq!(result.severity, SeverityTier::High);
        }
    }

    let decision = h.gate.evaluate(&buy("SPY", 1_000.0)).await.unwrap();
    assert_eq!(decision.risk_score, 10.0);
    assert!(h
        .gate
        .audit()
        .entries()
        .iter()
        .any(|e| e.kind == AuditKind::ForcedTrip && e.subject == "quotes"));
}

#[tokio::test]
async fn trip_threshold_is_configurable() {
    let mut config = GateConfig::default();
    config.trip_sources_at = SeverityTier::Critical;
    let h = harness(config, Vec::new());
    let event = AnomalyEvent::new("price_gap", "gap").with_source("gap_detector");

    for _ in 0..6 {
        h.gate.report_anomaly(&event).await;
    }
    assert!(h.gate.is_enabled("gap_detector"));
    h.gate.report_anomaly(&event).await;
    assert!(!h.gate.is_enabled("gap_detector"));
}

#[tokio::test]
async fn operator_overrides_are_audited() {
    let h = harness(GateConfig::default(), Vec::new());

    assert_eq!(h.gate.force_trip("feed", "maintenance"), CircuitAction::ForcedOpen);
    assert_eq!(h.gate.force_trip("feed", "again"), CircuitAction::None);
    assert!(!h.gate.is_enabled("feed"));

    let record = h.gate.force_reset("feed").unwrap();
    assert_eq!(record.state, CircuitState::Closed);
    assert!(matches!(
        h.gate.force_reset("never_seen"),
        Err(GateError::Circuit(_))
    ));

    let kinds: Vec<AuditKind> = h.gate.audit().entries().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![AuditKind::ForcedTrip, AuditKind::Reset]);
    assert!(h.gate.audit().verify_integrity().is_ok());
}

#[tokio::test]
async fn every_outcome_and_cooldown_expiry_is_audited() {
    let h = harness(
        GateConfig::default(),
        vec![StaticCheck::passing("tape_reader", 10.0).with_source("feed")],
    );

    h.gate.record_outcome("feed", true);
    h.gate.record_outcome("feed", false);
    assert_eq!(h.gate.audit().len(), 2);

    for _ in 0..4 {
        h.gate.record_outcome("feed", false);
    }
    assert!(!h.gate.is_enabled("feed"));

    h.clock.advance(Duration::minutes(61));
    let decision = h.gate.evaluate(&buy("AAPL", 1_000.0)).await.unwrap();
    assert!(decision.checks.contains_key("tape_reader"));
    assert!(h.gate.is_enabled("feed"));

    let entries = h.gate.audit().entries();
    let kinds: Vec<AuditKind> = entries.iter().map(|e| e.kind).collect();
    let mut expected = vec![AuditKind::Outcome; 6];
    expected.extend([AuditKind::Transition, AuditKind::Decision]);
    assert_eq!(kinds, expected);
    assert_eq!(entries[5].body["action_taken"], "tripped");
    assert_eq!(entries[6].subject, "feed");
    assert_eq!(entries[6].body["state"], "half_open");
    assert!(h.gate.audit().verify_integrity().is_ok());
}

#[tokio::test]
async fn invalid_action_is_rejected_and_not_audited() {
    let h = harness(GateConfig::default(), vec![StaticCheck::passing("m", 1.0)]);

    let err = h.gate.evaluate(&buy("", 100.0)).await.unwrap_err();

    assert!(matches!(err, GateError::InvalidAction(_)));
    assert!(h.gate.audit().is_empty());
}

#[tokio::test]
async fn all_or_nothing_cancellation_surfaces() {
    let clock = Arc::new(ManualClock::starting_now());
    let gate = SafetyGate::builder(GateConfig::default())
        .with_clock(clock)
        .with_check(SlowCheck::new("slow", std::time::Duration::from_secs(10), 50.0).shared())
        .build()
        .unwrap();

    let cancel = tokio::time::sleep(std::time::Duration::from_millis(30));
    let err = gate
        .evaluate_until(&buy("AAPL", 1.0), cancel, CompletionPolicy::AllOrNothing)
        .await
        .unwrap_err();

    assert!(matches!(err, GateError::Cancelled { outstanding: 1, total: 1 }));
}

#[tokio::test]
async fn duplicate_check_names_fail_build() {
    let err = SafetyGate::builder(GateConfig::default())
        .with_check(StaticCheck::passing("dup", 1.0).shared())
        .with_check(StaticCheck::passing("dup", 2.0).shared())
        .build()
        .unwrap_err();
    assert!(matches!(err, GateError::Registration(_)));
}

#[tokio::test]
async fn daily_window_and_health() {
    let h = harness(GateConfig::default(), vec![StaticCheck::passing("m", 1.0)]);
    let gap = AnomalyEvent::new("price_gap", "gap");
    for _ in 0..7 {
        h.gate.report_anomaly(&gap).await;
    }
    h.gate
        .report_anomaly(&AnomalyEvent::new("fill_mismatch", "partial"))
        .await;
    h.gate.evaluate(&buy("AAPL", 1.0)).await.unwrap();

    h.clock.advance(Duration::hours(24));
    let summary = h.gate.close_window().await;
    assert_eq!(summary.total_anomalies, 8);
    assert_eq!(summary.new_pattern_count(), 2);
    assert_eq!(summary.lessons_created, 2);
    assert_eq!(summary.escalations, 1);
    assert_eq!(summary.critical_patterns.len(), 1);

    let next = h.gate.daily_summary().await;
    assert_eq!(next.total_anomalies, 0);
    assert_eq!(next.critical_patterns.len(), 1);
    assert_eq!(h.gate.pattern("price_gap").await.unwrap().occurrence_count, 7);

    let health = h.gate.health().await;
    assert_eq!(health.registered_checks, vec!["m".to_string()]);
    assert_eq!(health.patterns_tracked, 2);
    assert_eq!(health.critical_patterns.len(), 1);
    assert_eq!(health.pending_decisions, 1);
    assert!(health.audit_intact);
    assert!(!health.is_nominal());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reports_lose_no_updates() {
    let h = harness(GateConfig::default(), Vec::new());
    let gate = Arc::new(h.gate);

    let mut handles = Vec::new();
    for i in 0..40 {
        let gate = Arc::clone(&gate);
        handles.push(tokio::spawn(async move {
            let category = if i % 2 == 0 { "duplicate_order" } else { "order_rejected" };
            gate.report_anomaly(&AnomalyEvent::new(category, format!("report {i}")))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(gate.pattern("duplicate_order").await.unwrap().occurrence_count, 20);
    assert_eq!(gate.pattern("order_rejected").await.unwrap().occurrence_count, 20);
    assert_eq!(h.lessons.count(), 2);
    assert_eq!(h.alerter.count(), 2);
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = GateConfig::default()
        .with_state_dir(dir.path())
        .with_audit_journal(dir.path().join("audit.jsonl"));

    {
        let h = harness(config.clone(), Vec::new());
        for _ in 0..5 {
            h.gate.record_outcome("feed", false);
        }
        for _ in 0..7 {
            h.gate
                .report_anomaly(&AnomalyEvent::new("signal_conflict", "disagree"))
                .await;
        }
    }

    let h = harness(config, Vec::new());
    assert!(!h.gate.is_enabled("feed"));
    let pattern = h.gate.pattern("signal_conflict").await.unwrap();
    assert_eq!(pattern.occurrence_count, 7);
    assert!(pattern.escalation_ref.is_some());

    h.gate
        .report_anomaly(&AnomalyEvent::new("signal_conflict", "again"))
        .await;
    assert_eq!(h.lessons.count(), 0);
    assert_eq!(h.alerter.count(), 0);

    let journal = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
    assert!(journal.lines().count() >= 8);
}
