// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Review specs: park, claim, decide, lease expiry, reminders.

use crate::prelude::*;
use std::time::Duration;
use vg_core::AlertKind;
use vg_engine::ReviewError;

#[tokio::test]
async fn high_risk_parks_with_alert_and_approval_completes() {
    let w = world();
    w.fake.set_risk(0.85);
    let end = w.process(&raw_item("b", "explosion downtown")).await;
    assert_eq!(end, RoundEnd::Parked);

    let wf = w.workflow("b").await;
    assert_eq!(wf.status, WorkflowStatus::AwaitingReview);
    assert!(wf.risk_score.unwrap() >= w.config.review_threshold);

    let alerts = w.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::ReviewRequested);

    let id = workflow_id("b");
    let page = w.review.list(0, 10).await.unwrap();
    assert_eq!(page.tasks.len(), 1);
    assert_eq!(page.tasks[0].workflow_id, id);

    let token = w.review.claim(&id, "op-1").await.unwrap();
    w.review.decide(&id, &token, ReviewDecision::Approve, None).await.unwrap();
    assert_eq!(w.orch.resume(&id).await.unwrap(), RoundEnd::Terminal);

    let wf = w.workflow("b").await;
    assert_eq!(wf.status, WorkflowStatus::Completed);
    assert_eq!(wf.review.as_ref().unwrap().decision, Some(ReviewDecision::Approve));
    assert_eq!(wf.review.as_ref().unwrap().decided_by.as_deref(), Some("op-1"));
    assert_eq!(w.notifications().len(), 1);
}

#[tokio::test]
async fn risk_exactly_at_threshold_parks() {
    let w = world();
    w.fake.set_risk(w.config.review_threshold);
    assert_eq!(w.process(&raw_item("eq", "borderline")).await, RoundEnd::Parked);
    assert_eq!(w.workflow("eq").await.status, WorkflowStatus::AwaitingReview);
}

#[tokio::test]
async fn just_below_threshold_passes_through() {
    let w = world();
    w.fake.set_risk(0.699_999);
    assert_eq!(w.process(&raw_item("lo", "almost")).await, RoundEnd::Terminal);
    assert_eq!(w.workflow("lo").await.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn reject_completes_without_publishing() {
    let w = world();
    w.fake.set_risk(0.9);
    w.process(&raw_item("rej", "rumor")).await;
    let id = workflow_id("rej");

    let token = w.review.claim(&id, "op-1").await.unwrap();
    w.review
        .decide(&id, &token, ReviewDecision::Reject, Some("fabricated".into()))
        .await
        .unwrap();
    w.orch.resume(&id).await.unwrap();

    let wf = w.workflow("rej").await;
    assert_eq!(wf.status, WorkflowStatus::Completed);
    assert_eq!(wf.review.as_ref().unwrap().feedback.as_deref(), Some("fabricated"));
    assert!(!wf.results.contains_key("publish"));
    assert!(w.notifications().is_empty());
}

#[tokio::test]
async fn needs_investigation_cancels() {
    let w = world();
    w.fake.set_risk(0.9);
    w.process(&raw_item("inv", "unclear")).await;
    let id = workflow_id("inv");
    let token = w.review.claim(&id, "op-1").await.unwrap();
    w.review.decide(&id, &token, ReviewDecision::NeedsInvestigation, None).await.unwrap();
    w.orch.resume(&id).await.unwrap();
    assert_eq!(w.workflow("inv").await.status, WorkflowStatus::Cancelled);
}

#[tokio::test]
async fn expired_lease_rejects_decision_and_workflow_stays_parked() {
    let w = world();
    w.fake.set_risk(0.9);
    w.process(&raw_item("exp", "tense")).await;
    let id = workflow_id("exp");

    let token = w.review.claim(&id, "op-1").await.unwrap();
    w.advance(Duration::from_millis(w.config.review_lease_ms + 1));
    let err =
        w.review.decide(&id, &token, ReviewDecision::Approve, None).await.unwrap_err();
    assert!(matches!(err, ReviewError::LeaseInvalid));
    assert_eq!(w.workflow("exp").await.status, WorkflowStatus::AwaitingReview);

    // A fresh claim and decision still work.
    let token = w.review.claim(&id, "op-2").await.unwrap();
    w.review.decide(&id, &token, ReviewDecision::Approve, None).await.unwrap();
    w.orch.resume(&id).await.unwrap();
    assert_eq!(w.workflow("exp").await.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn overdue_review_reminds_but_never_decides() {
    let w = world();
    w.fake.set_risk(0.9);
    w.process(&raw_item("late", "tense")).await;
    let id = workflow_id("late");

    w.advance(Duration::from_millis(w.config.review_deadline_ms + 1));
    let reminders = w.review.overdue_reminders().await.unwrap();
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].workflow_id, id);
    assert_eq!(reminders[0].kind, AlertKind::ReviewReminder);
    assert_eq!(w.workflow("late").await.status, WorkflowStatus::AwaitingReview);
}

#[tokio::test]
async fn cancel_while_awaiting_review_is_immediate() {
    let w = world();
    w.fake.set_risk(0.9);
    w.process(&raw_item("cxl", "tense")).await;
    let id = workflow_id("cxl");
    vg_engine::cancel(&w.store, &id, &w.clock).await.unwrap();
    assert_eq!(w.workflow("cxl").await.status, WorkflowStatus::Cancelled);
    assert!(w.review.list(0, 10).await.unwrap().tasks.is_empty());
}

#[tokio::test]
async fn review_pause_does_not_consume_processing_budget() {
    let w = world();
    w.fake.set_risk(0.9);
    w.process(&raw_item("slow", "tense")).await;
    let id = workflow_id("slow");

    // Sit in review for two days, far past the workflow deadline.
    w.advance(Duration::from_secs(48 * 60 * 60));
    let token = w.review.claim(&id, "op-1").await.unwrap();
    w.review.decide(&id, &token, ReviewDecision::Approve, None).await.unwrap();
    assert_eq!(w.orch.resume(&id).await.unwrap(), RoundEnd::Terminal);
    assert_eq!(w.workflow("slow").await.status, WorkflowStatus::Completed);
}
