// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recovery specs: crash mid-pipeline, owner handover, redelivery adoption.

use crate::prelude::*;

#[tokio::test]
async fn crash_after_entity_checkpoint_resumes_at_claim_extract() {
    let w = world();
    let item = raw_item("cr-1", "calm");
    let id = workflow_id("cr-1");

    // Uninterrupted reference run in an identical world.
    let reference = world();
    reference.process(&raw_item("cr-1", "calm")).await;
    let expected = reference.workflow("cr-1").await;

    // Crashed run: the first owner checkpointed through EntityExtract and
    // died. Reproduce that exact persisted state.
    w.process(&item).await;
    vg_engine::update_workflow(&w.store, &id, |wf| {
        wf.status = WorkflowStatus::Running;
        wf.current_node = Stage::ClaimExtract;
        wf.results.retain(|key, _| key == "normalize" || key == "entity");
        wf.risk_score = None;
        Ok(())
    })
    .await
    .unwrap();

    // A different process performs the recovery pass.
    let successor = second_owner(&w, "sup-2");
    let adopted = recover_orphans(&successor).await.unwrap();
    assert_eq!(adopted, 1);

    // Idempotence law: same terminal state as an uninterrupted run,
    // modulo timestamps and the generated claim ids.
    let recovered = w.workflow("cr-1").await;
    assert_eq!(recovered.status, expected.status);
    assert_eq!(
        recovered.results.keys().collect::<Vec<_>>(),
        expected.results.keys().collect::<Vec<_>>()
    );
    assert_eq!(recovered.risk_score, expected.risk_score);
    assert_eq!(recovered.errors.len(), expected.errors.len());
}

#[tokio::test]
async fn redelivery_of_uncommitted_message_resumes_orphan() {
    let w = world();
    let item = raw_item("cr-2", "calm");
    let id = workflow_id("cr-2");

    // First owner processes the item, then "crashes": rewind the record
    // to mid-flight with no live lease.
    let intake = w.deliver(&item).await;
    w.orch.process_intake(intake).await.unwrap();
    vg_engine::update_workflow(&w.store, &id, |wf| {
        wf.status = WorkflowStatus::Running;
        wf.current_node = Stage::RiskScore;
        wf.results.remove("risk");
        wf.results.remove("draft");
        wf.results.remove("translate");
        wf.results.remove("publish");
        wf.risk_score = None;
        Ok(())
    })
    .await
    .unwrap();

    // Redelivery on another process adopts the orphan instead of dropping
    // it as a duplicate.
    let successor = second_owner(&w, "sup-2");
    let item_again = raw_item("cr-2", "calm");
    w.gateway.publish_raw_item(&item_again).await.unwrap();
    let intake = w.next_intake().await.unwrap();
    let end = successor.process_intake(intake).await.unwrap();
    assert_eq!(end, RoundEnd::Terminal);
    assert_eq!(w.workflow("cr-2").await.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn recovery_skips_live_owners_and_terminal_workflows() {
    let w = world();
    w.process(&raw_item("cr-3", "calm")).await;

    // Terminal: ignored.
    let successor = second_owner(&w, "sup-2");
    assert_eq!(recover_orphans(&successor).await.unwrap(), 0);
}

#[tokio::test]
async fn parked_workflow_survives_process_restart() {
    let w = world();
    w.fake.set_risk(0.9);
    w.process(&raw_item("cr-4", "tense")).await;
    let id = workflow_id("cr-4");

    // Restarted process: recovery leaves parked workflows to the review
    // flow, and the decision still resumes them.
    let successor = second_owner(&w, "sup-2");
    assert_eq!(recover_orphans(&successor).await.unwrap(), 0);

    let token = w.review.claim(&id, "op-1").await.unwrap();
    w.review.decide(&id, &token, ReviewDecision::Approve, None).await.unwrap();
    assert_eq!(successor.resume(&id).await.unwrap(), RoundEnd::Terminal);
    assert_eq!(w.workflow("cr-4").await.status, WorkflowStatus::Completed);
}
