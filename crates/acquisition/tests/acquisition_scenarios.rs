//! End-to-end acquisition scenarios against scripted sources.
//!
//! Tests run on a paused runtime clock, so backoff sleeps, call timeouts
//! and recovery timeouts elapse instantly. Cache expiry is the exception.

mod common;

use std::time::Duration;

use common::{engine, engine_with, ScriptedAdapter, Step};
use marketfeed_acquisition::{
    cancel_pair, AcquisitionError, AcquisitionRequest, CircuitState, EngineConfig, ErrorKind,
    HealthStatus, IssueKind, SourceConfig,
};
use rust_decimal_macros::dec;
use tokio::time::Instant;

// =============================================================================
// Failover
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_failover_past_two_broken_sources() {
    let a = ScriptedAdapter::new("A", Step::network());
    let b = ScriptedAdapter::new("B", Step::network());
    let c = ScriptedAdapter::with_script("C", vec![Step::Hang], Step::price("101.25"));
    let engine = engine(&[a.clone(), b.clone(), c.clone()]);

    let fetched = engine
        .fetch(&AcquisitionRequest::quote("AAPL").with_candidates(["A", "B", "C"]))
        .await
        .unwrap();

    assert_eq!(fetched.meta.source_id, "C");
    assert_eq!(fetched.record.as_quote().unwrap().close, dec!(101.25));

    // A and B exhaust their attempts; C times out once and succeeds on retry
    assert_eq!(a.calls(), 3);
    assert_eq!(b.calls(), 3);
    assert_eq!(c.calls(), 2);

    let health = engine.source_health();
    assert_eq!(health["A"].status, HealthStatus::Degraded);
    assert_eq!(health["B"].status, HealthStatus::Degraded);
    assert_eq!(health["C"].status, HealthStatus::Healthy);

    let circuits = engine.circuit_states();
    assert_eq!(circuits["A"].consecutive_failures, 1);
    assert_eq!(circuits["C"].consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_reports_every_candidate_in_order() {
    let sources: Vec<_> = ["W", "X", "Y", "Z"]
        .iter()
        .map(|id| ScriptedAdapter::new(id, Step::status(401)))
        .collect();
    let engine = engine(&sources);

    let error = engine
        .fetch(&AcquisitionRequest::quote("AAPL"))
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Unavailable);
    assert!(!error.is_retryable());
    let failed: Vec<_> = error
        .source_failures()
        .iter()
        .map(|failure| (failure.source_id().to_string(), failure.kind()))
        .collect();
    assert_eq!(
        failed,
        vec![
            ("W".to_string(), ErrorKind::Auth),
            ("X".to_string(), ErrorKind::Auth),
            ("Y".to_string(), ErrorKind::Auth),
            ("Z".to_string(), ErrorKind::Auth),
        ]
    );
    // Auth failures are never retried
    assert!(sources.iter().all(|source| source.calls() == 1));
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_source_is_tried_last() {
    let flaky = ScriptedAdapter::new("FLAKY", Step::network());
    let steady = ScriptedAdapter::new("STEADY", Step::price("50"));
    let engine = engine_with(
        &[flaky.clone(), steady.clone()],
        EngineConfig {
            unhealthy_after_failures: 1,
            ..EngineConfig::default()
        },
    );

    let first = engine
        .fetch(&AcquisitionRequest::quote("AAPL"))
        .await
        .unwrap();
    assert_eq!(first.meta.source_id, "STEADY");
    assert_eq!(flaky.calls(), 3);
    assert_eq!(engine.source_health()["FLAKY"].status, HealthStatus::Unhealthy);

    // Second request ranks STEADY first and never reaches FLAKY
    engine
        .fetch(&AcquisitionRequest::quote("MSFT"))
        .await
        .unwrap();
    assert_eq!(flaky.calls(), 3);
    assert_eq!(steady.calls(), 2);
}

// =============================================================================
// Circuit breaker
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_open_circuit_skips_source_until_recovery() {
    let primary = ScriptedAdapter::new("PRIMARY", Step::status(503));
    let backup = ScriptedAdapter::new("BACKUP", Step::price("10"));
    let engine = engine_with(
        &[primary.clone(), backup.clone()],
        EngineConfig {
            failure_threshold: 2,
            ..EngineConfig::default()
        },
    );
    let only_primary =
        |symbol: &str| AcquisitionRequest::quote(symbol).with_candidates(["PRIMARY"]);

    // Each invocation retries 3 times, then counts as one circuit failure
    engine.fetch(&only_primary("A1")).await.unwrap_err();
    engine.fetch(&only_primary("A2")).await.unwrap_err();
    assert_eq!(engine.circuit_states()["PRIMARY"].state, CircuitState::Open);
    assert_eq!(primary.calls(), 6);

    // Open: rejected without calling the source
    let error = engine.fetch(&only_primary("A3")).await.unwrap_err();
    assert_eq!(error.source_failures()[0].kind(), ErrorKind::CircuitOpen);
    assert_eq!(primary.calls(), 6);

    let served = engine
        .fetch(&AcquisitionRequest::quote("A3"))
        .await
        .unwrap();
    assert_eq!(served.meta.source_id, "BACKUP");
    assert_eq!(primary.calls(), 6);

    // After the recovery timeout one probe goes through and closes the circuit
    tokio::time::sleep(Duration::from_secs(61)).await;
    primary.push(Step::price("11"));
    let probed = engine.fetch(&only_primary("A4")).await.unwrap();

    assert_eq!(probed.meta.source_id, "PRIMARY");
    assert_eq!(primary.calls(), 7);
    assert_eq!(engine.circuit_states()["PRIMARY"].state, CircuitState::Closed);
    assert_eq!(engine.circuit_states()["PRIMARY"].consecutive_failures, 0);
    assert_eq!(engine.source_health()["PRIMARY"].status, HealthStatus::Healthy);
}

#[tokio::test(start_paused = true)]
async fn test_not_found_never_opens_circuit() {
    let source = ScriptedAdapter::new("S", Step::status(404));
    let engine = engine_with(
        &[source.clone()],
        EngineConfig {
            failure_threshold: 1,
            ..EngineConfig::default()
        },
    );

    for symbol in ["A", "B", "C"] {
        let error = engine
            .fetch(&AcquisitionRequest::quote(symbol))
            .await
            .unwrap_err();
        assert_eq!(error.source_failures()[0].kind(), ErrorKind::NotFound);
    }

    assert_eq!(source.calls(), 3);
    assert_eq!(engine.circuit_states()["S"].state, CircuitState::Closed);
}

// =============================================================================
// Validation and cache
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_invalid_record_is_never_returned() {
    let broken = ScriptedAdapter::new(
        "BROKEN",
        Step::Quote {
            close: "120",
            high: "100",
            low: "150",
        },
    );
    let engine = engine(&[broken.clone()]);

    let error = engine
        .fetch(&AcquisitionRequest::quote("AAPL"))
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Validation);
    let per_source = &error.source_failures()[0];
    assert!(per_source
        .validation_issues()
        .iter()
        .any(|issue| issue.kind == IssueKind::BusinessRule && issue.field.as_deref() == Some("low")));
    assert_eq!(broken.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_source_fails_over_to_valid_one() {
    let broken = ScriptedAdapter::new(
        "BROKEN",
        Step::Quote {
            close: "120",
            high: "100",
            low: "150",
        },
    );
    let good = ScriptedAdapter::new("GOOD", Step::price("120"));
    let engine = engine(&[broken, good]);

    let fetched = engine
        .fetch(&AcquisitionRequest::quote("AAPL"))
        .await
        .unwrap();
    assert_eq!(fetched.meta.source_id, "GOOD");
}

#[tokio::test(start_paused = true)]
async fn test_source_serving_invalid_data_is_ranked_behind_valid_one() {
    let broken = ScriptedAdapter::new(
        "BROKEN",
        Step::Quote {
            close: "120",
            high: "100",
            low: "150",
        },
    );
    let good = ScriptedAdapter::new("GOOD", Step::price("120"));
    let engine = engine(&[broken.clone(), good.clone()]);

    for symbol in ["A", "B", "C", "D", "E"] {
        let fetched = engine
            .fetch(&AcquisitionRequest::quote(symbol))
            .await
            .unwrap();
        assert_eq!(fetched.meta.source_id, "GOOD");
    }

    // Only the first request reached BROKEN; afterwards it ranks last
    assert_eq!(broken.calls(), 1);
    assert_eq!(good.calls(), 5);
    let health = engine.source_health();
    assert_eq!(health["BROKEN"].status, HealthStatus::Degraded);
    assert_eq!(health["BROKEN"].consecutive_failures, 1);
    assert_eq!(engine.circuit_states()["BROKEN"].consecutive_failures, 0);
}

// The cache expires on wall-clock time, so this one runs unpaused
#[tokio::test]
async fn test_cache_hit_skips_sources_until_ttl() {
    let source = ScriptedAdapter::new("S", Step::price("42"));
    let engine = engine_with(
        &[source.clone()],
        EngineConfig {
            cache_ttl_ms: 200,
            ..EngineConfig::default()
        },
    );
    let request = AcquisitionRequest::quote("AAPL");

    let first = engine.fetch(&request).await.unwrap();
    let second = engine.fetch(&request).await.unwrap();

    assert!(!first.meta.from_cache);
    assert!(second.meta.from_cache);
    assert_ne!(first.meta.request_id, second.meta.request_id);
    assert_eq!(second.record, first.record);
    assert_eq!(source.calls(), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let third = engine.fetch(&request).await.unwrap();
    assert!(!third.meta.from_cache);
    assert_eq!(source.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_zero_ttl_disables_cache() {
    let source = ScriptedAdapter::new("S", Step::price("42"));
    let engine = engine_with(
        &[source.clone()],
        EngineConfig {
            cache_ttl_ms: 0,
            ..EngineConfig::default()
        },
    );
    let request = AcquisitionRequest::quote("AAPL");

    engine.fetch(&request).await.unwrap();
    let again = engine.fetch(&request).await.unwrap();
    assert!(!again.meta.from_cache);
    assert_eq!(source.calls(), 2);
}

// =============================================================================
// Cancellation and admission
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancellation_is_not_a_failure() {
    let slow = ScriptedAdapter::new("SLOW", Step::Hang);
    let backup = ScriptedAdapter::new("BACKUP", Step::price("1"));
    let engine = engine(&[slow.clone(), backup.clone()]);
    let (handle, signal) = cancel_pair();
    let request = AcquisitionRequest::quote("AAPL");

    let cancel_soon = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();
    };
    let (result, ()) = tokio::join!(engine.fetch_cancellable(&request, &signal), cancel_soon);

    match result {
        Err(AcquisitionError::Cancelled { request_id }) => assert!(!request_id.is_empty()),
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert_eq!(slow.calls(), 1);
    assert_eq!(backup.calls(), 0);
    assert_eq!(engine.circuit_states()["SLOW"].consecutive_failures, 0);
    assert!(engine.source_health()["SLOW"].last_checked_at.is_none());

    // Already-cancelled signals return without calling anything
    let late = engine.fetch_cancellable(&request, &signal).await;
    assert!(late.unwrap_err().is_cancelled());
    assert_eq!(slow.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_spaces_concurrent_requests() {
    let limited = ScriptedAdapter::with_config(
        "LIMITED",
        Step::price("7"),
        SourceConfig {
            requests_per_second: 1,
            requests_per_minute: 60,
            requests_per_hour: 1_000,
            burst_limit: 1,
            ..SourceConfig::default()
        },
    );
    let engine = engine(&[limited.clone()]);
    let started = Instant::now();

    let request_a = AcquisitionRequest::quote("A");
    let request_b = AcquisitionRequest::quote("B");
    let request_c = AcquisitionRequest::quote("C");
    let (first, second, third) = tokio::join!(
        engine.fetch(&request_a),
        engine.fetch(&request_b),
        engine.fetch(&request_c),
    );

    assert!(first.is_ok() && second.is_ok() && third.is_ok());
    assert_eq!(limited.calls(), 3);
    assert!(started.elapsed() >= Duration::from_secs(2));
}
