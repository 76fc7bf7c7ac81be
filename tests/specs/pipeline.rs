// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline specs: happy path, dedup, retries, poison handling.

use crate::prelude::*;
use vg_core::{AlertKind, ErrorKind, NodeError, Severity};

#[tokio::test]
async fn happy_path_low_risk() {
    let w = world();
    let end = w.process(&raw_item("a", "calm")).await;
    assert_eq!(end, RoundEnd::Terminal);

    let wf = w.workflow("a").await;
    assert_eq!(wf.status, WorkflowStatus::Completed);
    for key in ["normalize", "entity", "claims", "risk", "draft", "translate", "publish"] {
        assert!(wf.results.contains_key(key), "missing result {key}");
    }
    assert!(wf.errors.is_empty());

    let notifications = w.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].severity, Severity::Info);
    assert!(w.alerts().is_empty());
}

#[tokio::test]
async fn duplicate_delivery_is_idempotent() {
    let w = world();
    let item = raw_item("c", "calm");
    assert_eq!(w.process(&item).await, RoundEnd::Terminal);
    let first = w.workflow("c").await;

    assert_eq!(w.process(&item).await, RoundEnd::Duplicate);
    let second = w.workflow("c").await;

    // Same workflow id, same results, no duplicate notifications.
    assert_eq!(second.workflow_id, first.workflow_id);
    assert_eq!(second.results, first.results);
    assert_eq!(w.notifications().len(), 1);
    let states = w.store.scan_prefix(keys::WF_STATE_PREFIX).await.unwrap();
    assert_eq!(states.len(), 1);
}

#[tokio::test]
async fn transient_failures_surface_in_retry_counts() {
    let w = world();
    w.fake.script(Stage::EvidenceRetrieve, Err(NodeError::retryable("upstream 503")));
    w.fake.script(Stage::EvidenceRetrieve, Err(NodeError::retryable("upstream 503")));

    assert_eq!(w.process(&raw_item("d", "calm")).await, RoundEnd::Terminal);
    let wf = w.workflow("d").await;
    assert_eq!(wf.status, WorkflowStatus::Completed);
    assert_eq!(wf.retry_counts["evidence"], 2);
    assert_eq!(wf.errors.len(), 2);
    assert!(wf.errors.iter().all(|e| e.kind == ErrorKind::Retryable));
    assert!(wf.errors[0].attempt < wf.errors[1].attempt);
}

#[tokio::test]
async fn content_failure_is_not_poison() {
    let w = world();
    w.fake.script(Stage::EntityExtract, Err(NodeError::validation("unparseable")));
    assert_eq!(w.process(&raw_item("e", "calm")).await, RoundEnd::Terminal);

    let wf = w.workflow("e").await;
    assert_eq!(wf.status, WorkflowStatus::Failed);
    // The message itself was fine: no DLQ entry, but a critical alert.
    assert!(w.bus.drain_payloads(Topic::Dlq).is_empty());
    let alerts = w.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::WorkflowFailed);
    assert_eq!(alerts[0].severity, Severity::Critical);
}

#[tokio::test]
async fn repeated_redelivery_dead_letters_and_fails_workflow() {
    let w = world();
    let item = raw_item("p", "calm");
    w.gateway.publish_raw_item(&item).await.unwrap();

    // Simulate a consumer that keeps crashing before commit.
    let mut intake = None;
    for _ in 0..=w.config.dlq_attempt_cap {
        intake = w.next_intake().await;
    }
    let Some(Intake::Poison { source_id, envelope }) = intake else {
        panic!("expected poison intake after cap, got {intake:?}");
    };
    assert!(envelope.attempts > w.config.dlq_attempt_cap);

    w.orch
        .process_intake(Intake::Poison { source_id, envelope })
        .await
        .unwrap();
    assert_eq!(w.workflow("p").await.status, WorkflowStatus::Failed);
    assert_eq!(w.bus.drain_payloads(Topic::Dlq).len(), 1);
    // The partition is clean afterwards.
    assert!(w.next_intake().await.is_none());
}

#[tokio::test]
async fn zero_claims_is_not_all_claims_failed() {
    let w = world();
    w.fake.set_claim_texts(Vec::new());
    assert_eq!(w.process(&raw_item("z", "calm")).await, RoundEnd::Terminal);
    let wf = w.workflow("z").await;
    assert_eq!(wf.status, WorkflowStatus::Completed);
    assert_eq!(wf.results["merge"]["claims"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn cancel_after_completion_reports_terminal() {
    let w = world();
    w.process(&raw_item("t", "calm")).await;
    let id = workflow_id("t");
    let err = vg_engine::cancel(&w.store, &id, &w.clock).await.unwrap_err();
    assert!(matches!(err, vg_engine::OpsError::Terminal));
    assert_eq!(w.workflow("t").await.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn status_surface_returns_snapshots() {
    let w = world();
    w.process(&raw_item("s", "calm")).await;
    let snapshot = vg_engine::status(&w.store, &workflow_id("s")).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Completed);
    assert!(matches!(
        vg_engine::status(&w.store, &workflow_id("missing")).await.unwrap_err(),
        vg_engine::OpsError::NotFound
    ));
}
