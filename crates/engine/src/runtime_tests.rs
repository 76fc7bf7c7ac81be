// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::collab::FakeCollaborator;
use crate::state::create_workflow;
use vg_core::{FakeClock, WorkflowStatus};
use vg_store::MemoryStore;

struct Harness {
    store: Arc<dyn StateStore>,
    fake: Arc<FakeCollaborator>,
    runtime: NodeRuntime<FakeClock>,
    workflow_id: WorkflowId,
}

async fn harness() -> Harness {
    // Millisecond backoff keeps retry tests fast; the policy shape is
    // identical to the production defaults.
    let mut config = VigilConfig::default();
    config.retry_base_ms = 1;
    config.retry_cap_ms = 10;
    harness_with(config).await
}

async fn harness_with(config: VigilConfig) -> Harness {
    let clock = FakeClock::new();
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new(clock.clone()));
    let fake = FakeCollaborator::new();
    let runtime = NodeRuntime::new(
        store.clone(),
        Arc::new(fake.collaborators()),
        Arc::new(config),
        clock.clone(),
    );
    let workflow = Workflow::builder().status(WorkflowStatus::Running).build();
    let workflow_id = workflow.workflow_id;
    create_workflow(&store, workflow).await.unwrap();
    Harness { store, fake, runtime, workflow_id }
}

#[tokio::test]
async fn success_returns_output_without_errors() {
    let h = harness().await;
    let output = h.runtime.run_stage(&h.workflow_id, Stage::Normalize, None).await.unwrap();
    assert_eq!(output, serde_json::json!({"text": "calm"}));
    let wf = load_workflow(&h.store, &h.workflow_id).await.unwrap().unwrap();
    assert!(wf.errors.is_empty());
    assert!(wf.retry_counts.is_empty());
}

#[tokio::test]
async fn retryable_failures_retry_then_succeed() {
    let h = harness().await;
    h.fake.script(Stage::EvidenceRetrieve, Err(NodeError::retryable("503")));
    h.fake.script(Stage::EvidenceRetrieve, Err(NodeError::retryable("503")));
    let output =
        h.runtime.run_stage(&h.workflow_id, Stage::EvidenceRetrieve, None).await.unwrap();
    assert_eq!(output, serde_json::json!({"evidence": []}));

    let wf = load_workflow(&h.store, &h.workflow_id).await.unwrap().unwrap();
    assert_eq!(wf.retry_counts["evidence"], 2);
    assert_eq!(wf.errors.len(), 2);
    assert_eq!(wf.errors[0].attempt, 1);
    assert_eq!(wf.errors[1].attempt, 2);
    assert_eq!(h.fake.calls().len(), 3);
}

#[tokio::test]
async fn retries_exhaust_at_cap() {
    let h = harness().await;
    for _ in 0..3 {
        h.fake.script(Stage::EvidenceRetrieve, Err(NodeError::retryable("503")));
    }
    let err =
        h.runtime.run_stage(&h.workflow_id, Stage::EvidenceRetrieve, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Retryable);
    let wf = load_workflow(&h.store, &h.workflow_id).await.unwrap().unwrap();
    assert_eq!(wf.errors.len(), 3);
    assert_eq!(h.fake.calls().len(), 3, "no attempt beyond the cap");
}

#[tokio::test]
async fn validation_fails_immediately() {
    let h = harness().await;
    h.fake.script(Stage::EntityExtract, Err(NodeError::validation("no text")));
    let err =
        h.runtime.run_stage(&h.workflow_id, Stage::EntityExtract, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(h.fake.calls().len(), 1);
    let wf = load_workflow(&h.store, &h.workflow_id).await.unwrap().unwrap();
    assert_eq!(wf.errors.len(), 1);
    assert!(wf.retry_counts.is_empty());
}

#[tokio::test]
async fn upstream_failure_fails_immediately() {
    let h = harness().await;
    h.fake.script(Stage::Translate, Err(NodeError::upstream("model gone")));
    let err = h.runtime.run_stage(&h.workflow_id, Stage::Translate, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::PermanentUpstreamFailure);
    assert_eq!(h.fake.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn overrunning_stage_classifies_as_timeout() {
    struct Stall;
    #[async_trait::async_trait]
    impl crate::collab::Collaborator for Stall {
        async fn apply(&self, _: StageInput) -> Result<serde_json::Value, NodeError> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(serde_json::Value::Null)
        }
    }

    let clock = FakeClock::new();
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new(clock.clone()));
    let mut config = VigilConfig::default();
    config.retry_max_attempts = 1;
    let collabs = Collaborators::new().with(Stage::Normalize, Arc::new(Stall));
    let runtime = NodeRuntime::new(store.clone(), Arc::new(collabs), Arc::new(config), clock);
    let workflow = Workflow::builder().status(WorkflowStatus::Running).build();
    let id = workflow.workflow_id;
    create_workflow(&store, workflow).await.unwrap();

    let err = runtime.run_stage(&id, Stage::Normalize, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn cancel_tombstone_observed_at_attempt_boundary() {
    let h = harness().await;
    update_workflow(&h.store, &h.workflow_id, |wf| {
        wf.cancel_requested = true;
        Ok(())
    })
    .await
    .unwrap();
    let err = h.runtime.run_stage(&h.workflow_id, Stage::Normalize, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert!(h.fake.calls().is_empty(), "stage not invoked after tombstone");
}

#[tokio::test]
async fn unbound_stage_is_a_validation_error() {
    let clock = FakeClock::new();
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new(clock.clone()));
    let runtime = NodeRuntime::new(
        store.clone(),
        Arc::new(Collaborators::new()),
        Arc::new(VigilConfig::default()),
        clock,
    );
    let workflow = Workflow::builder().status(WorkflowStatus::Running).build();
    let id = workflow.workflow_id;
    create_workflow(&store, workflow).await.unwrap();
    let err = runtime.run_stage(&id, Stage::Normalize, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
}
