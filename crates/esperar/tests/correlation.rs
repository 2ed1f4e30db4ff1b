//! End-to-end correlation behavior: runs, racing responses, timeouts.
//!
//! Time-sensitive cases use tokio's paused clock so deadlines are exact.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use esperar::{EsperarError, Exchange, HttpMethod, RequestPattern, RunOptions, Session};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn tag_exchange(name: &str) -> Exchange {
    Exchange::new(
        HttpMethod::Get,
        format!("https://sandbox.example.com/api/v1/tags/name/{name}"),
        200,
    )
}

#[tokio::test(start_paused = true)]
async fn tag_fetch_resolves_with_matched_summary() {
    init_tracing();
    let session = Session::with_default_deadline(Duration::from_secs(2));
    let (feed, _observer) = session.feed();

    let outcome = session
        .coordinator()
        .run(
            move || async move {
                // The "click" lands after half a second, well inside the
                // deadline.
                tokio::time::sleep(Duration::from_millis(500)).await;
                feed.send(
                    tag_exchange("PII").with_response_body(br#"{"name":"PII"}"#.to_vec()),
                )
                .await
                .map_err(|e| e.to_string())
            },
            vec![RequestPattern::get("/api/v1/tags/name/*")],
        )
        .await
        .unwrap();

    assert_eq!(outcome.exchanges.len(), 1);
    let summary = &outcome.exchanges[0];
    assert_eq!(summary.status, 200);
    assert!(summary.url.ends_with("/api/v1/tags/name/PII"));
    assert_eq!(summary.body_string().unwrap(), r#"{"name":"PII"}"#);
}

#[tokio::test(start_paused = true)]
async fn timeout_fires_at_deadline_not_before() {
    init_tracing();
    let session = Session::with_default_deadline(Duration::from_secs(2));
    let registry = session.registry();
    let started = Instant::now();

    let result = session
        .coordinator()
        .run(
            || async { Ok::<_, String>(()) },
            vec![RequestPattern::get("/api/v1/tags/name/*")],
        )
        .await;
    let elapsed = started.elapsed();

    match result {
        Err(EsperarError::ExchangeTimeout {
            unmatched,
            deadline_ms,
        }) => {
            assert_eq!(unmatched, vec!["GET /api/v1/tags/name/*".to_string()]);
            assert_eq!(deadline_ms, 2000);
        }
        other => panic!("expected ExchangeTimeout, got {other:?}"),
    }
    assert!(elapsed >= Duration::from_secs(2), "timed out early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(2100), "timed out late: {elapsed:?}");
    assert_eq!(registry.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn late_exchange_does_not_retroactively_succeed() {
    init_tracing();
    let session = Session::with_default_deadline(Duration::from_secs(2));
    let registry = session.registry();
    let (feed, observer) = session.feed();

    // The matching response arrives one unit after the deadline.
    let late = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2001)).await;
        let _ = feed.send(tag_exchange("PII")).await;
    });

    let result = session
        .coordinator()
        .run(
            || async { Ok::<_, String>(()) },
            vec![RequestPattern::get("/api/v1/tags/name/*")],
        )
        .await;
    assert!(matches!(result, Err(EsperarError::ExchangeTimeout { .. })));

    late.await.unwrap();
    // The timed-out expectation was removed from the pending list, so the
    // late exchange settles nothing.
    assert_eq!(observer.finish().await, 0);
    assert_eq!(registry.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn duplicate_patterns_consume_exchanges_in_arrival_order() {
    init_tracing();
    let session = Session::with_default_deadline(Duration::from_secs(2));
    let (feed, _observer) = session.feed();

    let outcome = session
        .coordinator()
        .run(
            move || async move {
                feed.send(tag_exchange("PII")).await.map_err(|e| e.to_string())?;
                feed.send(tag_exchange("Tier1")).await.map_err(|e| e.to_string())
            },
            vec![
                RequestPattern::get("/api/v1/tags/name/*"),
                RequestPattern::get("/api/v1/tags/name/*"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(outcome.exchanges.len(), 2);
    assert!(outcome.exchanges[0].url.ends_with("/PII"));
    assert!(outcome.exchanges[1].url.ends_with("/Tier1"));
}

#[tokio::test(start_paused = true)]
async fn summaries_follow_declaration_order_not_arrival_order() {
    init_tracing();
    let session = Session::with_default_deadline(Duration::from_secs(2));
    let (feed, _observer) = session.feed();

    // Declared: classifications first, tags second. Arrival: tags first.
    let outcome = session
        .coordinator()
        .run(
            move || async move {
                feed.send(tag_exchange("PII")).await.map_err(|e| e.to_string())?;
                feed.send(Exchange::new(
                    HttpMethod::Get,
                    "https://sandbox.example.com/api/v1/classifications?fields=usageCount",
                    200,
                ))
                .await
                .map_err(|e| e.to_string())
            },
            vec![
                RequestPattern::get("/api/v1/classifications*"),
                RequestPattern::get("/api/v1/tags/name/*"),
            ],
        )
        .await
        .unwrap();

    assert!(outcome.exchanges[0].url.contains("/classifications"));
    assert!(outcome.exchanges[1].url.contains("/tags/name/"));
}

#[tokio::test]
async fn failing_action_cancels_its_expectations() {
    init_tracing();
    let session = Session::new();
    let registry = session.registry();

    let result = session
        .coordinator()
        .run(
            || async { Err::<(), _>("save button missing".to_string()) },
            vec![RequestPattern::patch("/api/v1/tables/*")],
        )
        .await;

    match result {
        Err(EsperarError::ActionFailed { message }) => {
            assert!(message.contains("save button missing"));
        }
        other => panic!("expected ActionFailed, got {other:?}"),
    }
    assert_eq!(registry.pending_count(), 0);
}

#[tokio::test]
async fn invalid_pattern_aborts_before_action_runs() {
    init_tracing();
    let session = Session::new();
    let registry = session.registry();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);

    let result = session
        .coordinator()
        .run(
            move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, String>(())
            },
            vec![
                RequestPattern::get("/api/v1/tags/name/*"),
                RequestPattern::get(""),
            ],
        )
        .await;

    assert!(matches!(result, Err(EsperarError::InvalidPattern { .. })));
    assert!(!ran.load(Ordering::SeqCst), "action ran despite invalid pattern");
    assert_eq!(registry.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_runs_settle_independently() {
    init_tracing();
    let session = Session::with_default_deadline(Duration::from_secs(5));
    let (feed, _observer) = session.feed();
    let coordinator = session.coordinator();

    let feed_a = feed.clone();
    let run_a = coordinator.run(
        move || async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            feed_a.send(tag_exchange("PII")).await.map_err(|e| e.to_string())
        },
        vec![RequestPattern::get("/api/v1/tags/name/*")],
    );

    let feed_b = feed.clone();
    let run_b = coordinator.run(
        move || async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            feed_b
                .send(Exchange::new(
                    HttpMethod::Get,
                    "https://sandbox.example.com/api/v1/classifications?fields=usageCount",
                    200,
                ))
                .await
                .map_err(|e| e.to_string())
        },
        vec![RequestPattern::get("/api/v1/classifications*")],
    );

    let (a, b) = tokio::join!(run_a, run_b);
    let a = a.unwrap();
    let b = b.unwrap();
    assert!(a.exchanges[0].url.contains("/tags/name/PII"));
    assert!(b.exchanges[0].url.contains("/classifications"));
}

#[tokio::test(start_paused = true)]
async fn per_run_deadline_overrides_session_default() {
    init_tracing();
    let session = Session::new(); // 30s default
    let started = Instant::now();

    let result = session
        .coordinator()
        .run_with_options(
            || async { Ok::<_, String>(()) },
            vec![RequestPattern::get("/api/v1/tags/name/*")],
            RunOptions::with_deadline(Duration::from_secs(1)),
        )
        .await;

    assert!(matches!(result, Err(EsperarError::ExchangeTimeout { .. })));
    assert!(started.elapsed() < Duration::from_secs(2));
}
