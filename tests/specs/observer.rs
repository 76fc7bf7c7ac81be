// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observer specs: transition broadcasts reach subscribed clients.

use crate::prelude::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vg_observer::{run_forwarder, ObserverPlane, Room};

#[tokio::test]
async fn subscribers_see_the_full_transition_story() {
    let w = world();
    let plane = Arc::new(ObserverPlane::new(&w.config, w.clock.clone()));
    let cancel = CancellationToken::new();
    let forwarder =
        tokio::spawn(run_forwarder(w.store.clone(), plane.clone(), cancel.clone()));
    tokio::task::yield_now().await;

    let sub = plane.subscribe([Room::Global]);
    w.fake.set_risk(0.85);
    w.process(&raw_item("ob-1", "explosion")).await;
    // Let the forwarder drain the channel.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let mut types = Vec::new();
    while let Some(event) = sub.try_recv() {
        types.push(event);
    }
    assert!(types.iter().any(|e| matches!(
        e,
        NotificationEvent::StatusChanged { to: WorkflowStatus::Running, .. }
    )));
    assert!(types.iter().any(|e| matches!(e, NotificationEvent::RiskScored { .. })));
    assert!(types.iter().any(|e| matches!(e, NotificationEvent::ReviewRequested { .. })));

    // Decide and resume: the decision and the completion are broadcast.
    let id = workflow_id("ob-1");
    let token = w.review.claim(&id, "op-1").await.unwrap();
    w.review.decide(&id, &token, ReviewDecision::Approve, None).await.unwrap();
    w.orch.resume(&id).await.unwrap();
    // Let the forwarder drain the channel.
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let mut tail = Vec::new();
    while let Some(event) = sub.try_recv() {
        tail.push(event);
    }
    assert!(tail.iter().any(|e| matches!(e, NotificationEvent::ReviewDecided { .. })));
    assert!(tail.iter().any(|e| matches!(e, NotificationEvent::Completed { .. })));

    cancel.cancel();
    forwarder.await.unwrap();
}

#[tokio::test]
async fn workflow_room_isolates_streams() {
    let w = world();
    let plane = Arc::new(ObserverPlane::new(&w.config, w.clock.clone()));
    let cancel = CancellationToken::new();
    let forwarder =
        tokio::spawn(run_forwarder(w.store.clone(), plane.clone(), cancel.clone()));
    tokio::task::yield_now().await;

    let sub = plane.subscribe([Room::Workflow(workflow_id("ob-2"))]);
    w.process(&raw_item("ob-2", "calm")).await;
    w.process(&raw_item("ob-3", "calm")).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let mut seen = Vec::new();
    while let Some(event) = sub.try_recv() {
        seen.push(event);
    }
    assert!(!seen.is_empty());
    assert!(seen
        .iter()
        .all(|event| event.workflow_id() == Some(workflow_id("ob-2"))));

    cancel.cancel();
    forwarder.await.unwrap();
}
