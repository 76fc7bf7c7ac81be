// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The orchestrator: owns the fixed DAG, conditional routing, fan-out,
//! checkpoint placement, and pause/resume.
//!
//! Discipline per node: write state behind CAS, write the checkpoint, and
//! only then announce (publish downstream or commit the inbound offset).

use crate::collab::Collaborators;
use crate::error::EngineError;
use crate::fanout::run_claim_fanout;
use crate::lease;
use crate::runtime::NodeRuntime;
use crate::state::{
    apply_terminal_ttl, create_workflow, load_workflow, publish_event, update_workflow,
    write_checkpoint,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vg_bus::{BusError, BusGateway, Delivery, Intake, MessageBus};
use vg_core::{
    AlertKind, AlertMessage, Checkpoint, Claim, Clock, ErrorEntry, NodeError,
    NotificationEvent, NotificationMessage, RawItem, Severity, Stage, VigilConfig, Workflow,
    WorkflowId, WorkflowStatus,
};
use vg_store::{keys, StateStore, StoreError};

/// Consumer group binding orchestrator workers to `raw-items` partitions.
pub const CONSUMER_GROUP: &str = "verification-orchestrator";

const IDLE_POLL: Duration = Duration::from_millis(25);
const BUS_BACKOFF: Duration = Duration::from_millis(500);

/// Deterministic hex fingerprint of a source id.
pub fn fingerprint(source_id: &str) -> String {
    let digest = Sha256::digest(source_id.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// How one processing round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundEnd {
    /// Workflow reached a terminal status.
    Terminal,
    /// Workflow parked in `AwaitingReview`; resumption is decision-driven.
    Parked,
    /// Message acknowledged without processing (dedup or foreign owner).
    Duplicate,
}

/// Drives workflows for the partitions it is bound to.
pub struct Orchestrator<B: MessageBus, C: Clock> {
    store: Arc<dyn StateStore>,
    gateway: Arc<BusGateway<B, C>>,
    runtime: NodeRuntime<C>,
    config: Arc<VigilConfig>,
    clock: C,
    /// Supervisor-assigned identity, value of held owner-leases.
    owner: String,
}

impl<B: MessageBus, C: Clock + 'static> Orchestrator<B, C> {
    pub fn new(
        store: Arc<dyn StateStore>,
        gateway: Arc<BusGateway<B, C>>,
        collabs: Arc<Collaborators>,
        config: Arc<VigilConfig>,
        clock: C,
        owner: impl Into<String>,
    ) -> Self {
        let runtime = NodeRuntime::new(store.clone(), collabs, config.clone(), clock.clone());
        Self { store, gateway, runtime, config, clock, owner: owner.into() }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Poll one partition until cancelled, draining the in-flight round
    /// before returning.
    pub async fn run_partition(&self, partition: u32, cancel: CancellationToken) {
        tracing::info!(partition, owner = %self.owner, "orchestrator worker started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.gateway.next_raw_item(CONSUMER_GROUP, partition).await {
                Ok(Some(intake)) => {
                    if let Err(e) = self.process_intake(intake).await {
                        tracing::error!(partition, error = %e, "processing round failed");
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(IDLE_POLL) => {}
                    }
                }
                Err(BusError::Auth(e)) => {
                    tracing::error!(partition, "bus auth rejected, stopping worker: {e}");
                    break;
                }
                Err(e) => {
                    tracing::warn!(partition, error = %e, "bus unavailable, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(BUS_BACKOFF) => {}
                    }
                }
            }
        }
        tracing::info!(partition, "orchestrator worker stopped");
    }

    pub async fn process_intake(&self, intake: Intake) -> Result<RoundEnd, EngineError> {
        match intake {
            Intake::Fresh { item, delivery } => self.process_item(item, delivery).await,
            Intake::Poison { source_id, envelope } => {
                self.fail_poisoned(source_id, envelope.last_error).await?;
                Ok(RoundEnd::Terminal)
            }
        }
    }

    /// Process one delivered item: dedup, claim, drive.
    pub async fn process_item(
        &self,
        item: RawItem,
        delivery: Delivery,
    ) -> Result<RoundEnd, EngineError> {
        let workflow_id = WorkflowId::from_fingerprint(&fingerprint(&item.source_id));
        let lock_key = keys::wf_lock(&item.source_id);
        let lock_taken = match self
            .store
            .cas(
                &lock_key,
                0,
                workflow_id.as_str().as_bytes().to_vec(),
                Some(self.config.workflow_ttl()),
            )
            .await
        {
            Ok(_) => true,
            Err(StoreError::VersionConflict { .. }) => false,
            Err(e) => return Err(e.into()),
        };

        if lock_taken {
            let workflow = Workflow::new(
                workflow_id,
                &item.source_id,
                &item.source,
                item.payload.clone(),
                self.config.workflow_deadline(),
                &self.clock,
            );
            match create_workflow(&self.store, workflow).await {
                Ok(_) => {}
                // A previous owner crashed between lock expiry and now; the
                // record exists and we adopt it below.
                Err(EngineError::Store(StoreError::VersionConflict { .. })) => {}
                Err(e) => return Err(e),
            }
        } else {
            match load_workflow(&self.store, &workflow_id).await? {
                None => {
                    // Lock taken but record never written: the original
                    // owner died between the two writes. Create and drive.
                    let workflow = Workflow::new(
                        workflow_id,
                        &item.source_id,
                        &item.source,
                        item.payload.clone(),
                        self.config.workflow_deadline(),
                        &self.clock,
                    );
                    if let Err(e) = create_workflow(&self.store, workflow).await {
                        if !matches!(
                            e,
                            EngineError::Store(StoreError::VersionConflict { .. })
                        ) {
                            return Err(e);
                        }
                    }
                }
                Some(existing) => {
                    // Duplicate delivery: acknowledge without side effect
                    // unless the workflow is orphaned mid-flight, in which
                    // case redelivery doubles as recovery.
                    let orphaned = matches!(
                        existing.status,
                        WorkflowStatus::Pending | WorkflowStatus::Running | WorkflowStatus::Resuming
                    ) && !lease::is_owned(&self.store, &workflow_id).await?;
                    if !orphaned {
                        tracing::info!(
                            workflow_id = %workflow_id,
                            source_id = %item.source_id,
                            "duplicate delivery acknowledged"
                        );
                        self.gateway.ack(CONSUMER_GROUP, &delivery).await?;
                        return Ok(RoundEnd::Duplicate);
                    }
                }
            }
        }

        if !lease::acquire_lease(
            &self.store,
            &workflow_id,
            &self.owner,
            self.config.owner_lease(),
        )
        .await?
        {
            // A live owner is already driving this workflow.
            self.gateway.ack(CONSUMER_GROUP, &delivery).await?;
            return Ok(RoundEnd::Duplicate);
        }

        self.drive(&workflow_id, Some(&delivery)).await
    }

    /// Resume a workflow with no bus message outstanding (review decisions
    /// and recovery).
    pub async fn resume(&self, workflow_id: &WorkflowId) -> Result<RoundEnd, EngineError> {
        if !lease::acquire_lease(
            &self.store,
            workflow_id,
            &self.owner,
            self.config.owner_lease(),
        )
        .await?
        {
            return Ok(RoundEnd::Duplicate);
        }
        self.drive(workflow_id, None).await
    }

    /// Main loop: one node at a time from the current position, with the
    /// checkpoint-then-announce discipline at every boundary.
    async fn drive(
        &self,
        workflow_id: &WorkflowId,
        delivery: Option<&Delivery>,
    ) -> Result<RoundEnd, EngineError> {
        loop {
            lease::renew_lease(&self.store, workflow_id, self.config.owner_lease()).await?;
            let workflow = self
                .load_required(workflow_id)
                .await?;

            match workflow.status {
                WorkflowStatus::Pending => {
                    let from = workflow.status;
                    let now = self.clock.epoch_ms();
                    update_workflow(&self.store, workflow_id, |wf| {
                        // Redundant claims are fine; losing the race means
                        // someone else moved it first.
                        if wf.status == WorkflowStatus::Pending {
                            wf.transition(WorkflowStatus::Running, now)?;
                        }
                        Ok(())
                    })
                    .await?;
                    self.emit_status(workflow_id, from, WorkflowStatus::Running).await;
                    continue;
                }
                WorkflowStatus::Running => {}
                WorkflowStatus::Resuming => {
                    if let Some(end) = self.apply_decision(workflow_id).await? {
                        self.ack_round(delivery).await?;
                        return Ok(end);
                    }
                    continue;
                }
                WorkflowStatus::AwaitingReview => {
                    lease::release_lease(&self.store, workflow_id, &self.owner).await?;
                    self.ack_round(delivery).await?;
                    return Ok(RoundEnd::Parked);
                }
                WorkflowStatus::Completed
                | WorkflowStatus::Failed
                | WorkflowStatus::Cancelled => {
                    lease::release_lease(&self.store, workflow_id, &self.owner).await?;
                    self.ack_round(delivery).await?;
                    return Ok(RoundEnd::Terminal);
                }
            }

            if workflow.cancel_requested {
                return self.finalize_cancelled(workflow_id, workflow.status, delivery).await;
            }
            if workflow.is_past_deadline(self.clock.epoch_ms()) {
                let error = NodeError::timeout("workflow deadline exceeded");
                return self
                    .finalize_failed(workflow_id, workflow.current_node, error, true, delivery)
                    .await;
            }

            let stage = workflow.current_node;
            let result = match stage {
                Stage::Merge => match parse_claims(&workflow) {
                    Ok(claims) => run_claim_fanout(
                        &self.runtime,
                        workflow_id,
                        claims,
                        self.config.claim_parallelism,
                    )
                    .await
                    .map(|outcomes| serde_json::json!({ "claims": outcomes })),
                    Err(error) => Err(error),
                },
                Stage::AwaitReview => {
                    // Running + AwaitReview only occurs on a torn resume;
                    // park again and let the decision path move it.
                    lease::release_lease(&self.store, workflow_id, &self.owner).await?;
                    self.ack_round(delivery).await?;
                    return Ok(RoundEnd::Parked);
                }
                _ => self.runtime.run_stage(workflow_id, stage, None).await,
            };

            let output = match result {
                Ok(output) => output,
                Err(error) => {
                    if error.kind == vg_core::ErrorKind::Cancelled {
                        return self
                            .finalize_cancelled(workflow_id, workflow.status, delivery)
                            .await;
                    }
                    let record = matches!(stage, Stage::Merge);
                    return self
                        .finalize_failed(workflow_id, stage, error, record, delivery)
                        .await;
                }
            };

            match stage {
                Stage::RiskScore => {
                    let Some(risk) = output.get("risk_score").and_then(|v| v.as_f64()) else {
                        let error = NodeError::validation("risk output missing risk_score");
                        return self
                            .finalize_failed(workflow_id, stage, error, true, delivery)
                            .await;
                    };
                    self.complete_node(workflow_id, stage, output, Some(risk)).await?;
                    publish_event(
                        &self.store,
                        &NotificationEvent::RiskScored {
                            workflow_id: *workflow_id,
                            risk_score: risk,
                            at_ms: self.clock.epoch_ms(),
                        },
                    )
                    .await?;
                    // Threshold comparison is ≥, including exact equality.
                    if risk >= self.config.review_threshold {
                        self.park_for_review(workflow_id, risk).await?;
                        self.ack_round(delivery).await?;
                        return Ok(RoundEnd::Parked);
                    }
                }
                Stage::ClaimExtract => {
                    self.advertise_claims(workflow_id, &output).await;
                    self.complete_node(workflow_id, stage, output, None).await?;
                }
                Stage::Publish => {
                    self.complete_node(workflow_id, stage, output, None).await?;
                    return self
                        .finalize_completed(workflow_id, WorkflowStatus::Running, delivery)
                        .await;
                }
                _ => {
                    self.complete_node(workflow_id, stage, output, None).await?;
                }
            }
        }
    }

    /// Record the stage result, advance the cursor, and checkpoint.
    async fn complete_node(
        &self,
        workflow_id: &WorkflowId,
        stage: Stage,
        output: serde_json::Value,
        risk: Option<f64>,
    ) -> Result<Workflow, EngineError> {
        let now = self.clock.epoch_ms();
        let updated = update_workflow(&self.store, workflow_id, |wf| {
            wf.record_result(stage, output.clone(), now);
            if let Some(risk) = risk {
                wf.risk_score = Some(risk);
            }
            if let Some(next) = stage.next() {
                wf.current_node = next;
            }
            Ok(())
        })
        .await?;
        let attempt = updated.retry_counts.get(&stage.result_key()).copied().unwrap_or(0) + 1;
        write_checkpoint(
            &self.store,
            &Checkpoint { workflow_id: *workflow_id, node: stage, attempt, snapshot: updated.clone() },
        )
        .await?;
        tracing::debug!(workflow_id = %workflow_id, node = %stage, "node completed");
        Ok(updated)
    }

    /// Transition into `AwaitingReview`: index, checkpoint, alert, events.
    async fn park_for_review(
        &self,
        workflow_id: &WorkflowId,
        risk: f64,
    ) -> Result<(), EngineError> {
        let now = self.clock.epoch_ms();
        let updated = update_workflow(&self.store, workflow_id, |wf| {
            wf.request_review(now)?;
            wf.current_node = Stage::AwaitReview;
            Ok(())
        })
        .await?;
        self.store.review_push(workflow_id.as_str(), now).await?;
        write_checkpoint(
            &self.store,
            &Checkpoint {
                workflow_id: *workflow_id,
                node: Stage::AwaitReview,
                attempt: 1,
                snapshot: updated,
            },
        )
        .await?;
        self.gateway
            .publish_alert(&AlertMessage::new(
                *workflow_id,
                AlertKind::ReviewRequested,
                format!("risk {risk:.2} meets review threshold"),
                self.gateway.wire_now(),
            ))
            .await?;
        publish_event(
            &self.store,
            &NotificationEvent::ReviewRequested {
                workflow_id: *workflow_id,
                risk_score: risk,
                at_ms: now,
            },
        )
        .await?;
        self.emit_status(workflow_id, WorkflowStatus::Running, WorkflowStatus::AwaitingReview)
            .await;
        lease::release_lease(&self.store, workflow_id, &self.owner).await?;
        tracing::info!(workflow_id = %workflow_id, risk, "parked for review");
        Ok(())
    }

    /// Route a `Resuming` workflow by its recorded decision.
    ///
    /// Returns the round end for terminal decisions, `None` when the
    /// pipeline should keep driving.
    async fn apply_decision(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<RoundEnd>, EngineError> {
        let workflow = self.load_required(workflow_id).await?;
        let decision = workflow.review.as_ref().and_then(|review| review.decision);
        let now = self.clock.epoch_ms();
        match decision {
            Some(vg_core::ReviewDecision::Approve) => {
                update_workflow(&self.store, workflow_id, |wf| {
                    wf.credit_review_pause(now);
                    wf.transition(WorkflowStatus::Running, now)?;
                    wf.current_node = Stage::DraftAdvisory;
                    Ok(())
                })
                .await?;
                self.emit_status(workflow_id, WorkflowStatus::Resuming, WorkflowStatus::Running)
                    .await;
                Ok(None)
            }
            Some(vg_core::ReviewDecision::Reject) => {
                // Terminal completion with no downstream publish.
                update_workflow(&self.store, workflow_id, |wf| {
                    wf.transition(WorkflowStatus::Completed, now)?;
                    Ok(())
                })
                .await?;
                apply_terminal_ttl(&self.store, workflow_id, self.config.workflow_ttl())
                    .await?;
                publish_event(
                    &self.store,
                    &NotificationEvent::Completed { workflow_id: *workflow_id, at_ms: now },
                )
                .await?;
                self.emit_status(
                    workflow_id,
                    WorkflowStatus::Resuming,
                    WorkflowStatus::Completed,
                )
                .await;
                lease::release_lease(&self.store, workflow_id, &self.owner).await?;
                Ok(Some(RoundEnd::Terminal))
            }
            Some(vg_core::ReviewDecision::NeedsInvestigation) => {
                update_workflow(&self.store, workflow_id, |wf| {
                    wf.transition(WorkflowStatus::Cancelled, now)?;
                    Ok(())
                })
                .await?;
                apply_terminal_ttl(&self.store, workflow_id, self.config.workflow_ttl())
                    .await?;
                self.emit_status(
                    workflow_id,
                    WorkflowStatus::Resuming,
                    WorkflowStatus::Cancelled,
                )
                .await;
                lease::release_lease(&self.store, workflow_id, &self.owner).await?;
                Ok(Some(RoundEnd::Terminal))
            }
            // Decide writes the decision and the transition in one CAS, so
            // a Resuming record without a decision is torn state.
            None => Err(EngineError::ConsistencyLost(*workflow_id)),
        }
    }

    async fn finalize_completed(
        &self,
        workflow_id: &WorkflowId,
        from: WorkflowStatus,
        delivery: Option<&Delivery>,
    ) -> Result<RoundEnd, EngineError> {
        let now = self.clock.epoch_ms();
        update_workflow(&self.store, workflow_id, |wf| {
            wf.transition(WorkflowStatus::Completed, now)?;
            Ok(())
        })
        .await?;
        apply_terminal_ttl(&self.store, workflow_id, self.config.workflow_ttl()).await?;
        self.gateway
            .publish_notification(&NotificationMessage {
                workflow_id: *workflow_id,
                kind: "completed".to_string(),
                severity: Severity::Info,
                recipient_scope: "broadcast".to_string(),
                summary: "advisory published".to_string(),
                at: self.gateway.wire_now(),
            })
            .await?;
        publish_event(
            &self.store,
            &NotificationEvent::Completed { workflow_id: *workflow_id, at_ms: now },
        )
        .await?;
        self.emit_status(workflow_id, from, WorkflowStatus::Completed).await;
        lease::release_lease(&self.store, workflow_id, &self.owner).await?;
        self.ack_round(delivery).await?;
        tracing::info!(workflow_id = %workflow_id, "workflow completed");
        Ok(RoundEnd::Terminal)
    }

    async fn finalize_failed(
        &self,
        workflow_id: &WorkflowId,
        stage: Stage,
        error: NodeError,
        record_entry: bool,
        delivery: Option<&Delivery>,
    ) -> Result<RoundEnd, EngineError> {
        let now = self.clock.epoch_ms();
        let kind = error.kind;
        let updated = update_workflow(&self.store, workflow_id, |wf| {
            if record_entry {
                let attempt =
                    wf.retry_counts.get(&stage.result_key()).copied().unwrap_or(0) + 1;
                wf.record_error(ErrorEntry::from_node_error(stage, &error, attempt, now));
            }
            wf.transition(WorkflowStatus::Failed, now)?;
            Ok(())
        })
        .await?;
        apply_terminal_ttl(&self.store, workflow_id, self.config.workflow_ttl()).await?;
        if updated.status == WorkflowStatus::Failed {
            self.store.review_remove(workflow_id.as_str()).await?;
        }
        self.gateway
            .publish_alert(&AlertMessage::new(
                *workflow_id,
                AlertKind::WorkflowFailed,
                format!("{stage} failed: {kind}"),
                self.gateway.wire_now(),
            ))
            .await?;
        publish_event(
            &self.store,
            &NotificationEvent::Failed { workflow_id: *workflow_id, kind, at_ms: now },
        )
        .await?;
        lease::release_lease(&self.store, workflow_id, &self.owner).await?;
        self.ack_round(delivery).await?;
        tracing::warn!(workflow_id = %workflow_id, node = %stage, kind = %kind, "workflow failed");
        Ok(RoundEnd::Terminal)
    }

    async fn finalize_cancelled(
        &self,
        workflow_id: &WorkflowId,
        from: WorkflowStatus,
        delivery: Option<&Delivery>,
    ) -> Result<RoundEnd, EngineError> {
        let now = self.clock.epoch_ms();
        update_workflow(&self.store, workflow_id, |wf| {
            if !wf.status.is_terminal() {
                wf.transition(WorkflowStatus::Cancelled, now)?;
            }
            Ok(())
        })
        .await?;
        apply_terminal_ttl(&self.store, workflow_id, self.config.workflow_ttl()).await?;
        self.store.review_remove(workflow_id.as_str()).await?;
        self.emit_status(workflow_id, from, WorkflowStatus::Cancelled).await;
        lease::release_lease(&self.store, workflow_id, &self.owner).await?;
        self.ack_round(delivery).await?;
        tracing::info!(workflow_id = %workflow_id, "workflow cancelled");
        Ok(RoundEnd::Terminal)
    }

    /// Fail the workflow associated with a dead-lettered message, when one
    /// can be identified. The DLQ envelope itself is operator-facing only.
    pub async fn fail_poisoned(
        &self,
        source_id: Option<String>,
        last_error: vg_core::LastError,
    ) -> Result<(), EngineError> {
        let Some(source_id) = source_id else {
            tracing::warn!("undecodable poison message; no workflow to fail");
            return Ok(());
        };
        let workflow_id = WorkflowId::from_fingerprint(&fingerprint(&source_id));
        let workflow = match load_workflow(&self.store, &workflow_id).await? {
            Some(workflow) => {
                // Terminal workflows are done; parked ones belong to the
                // review flow, not the poison path.
                if workflow.is_terminal()
                    || workflow.status == WorkflowStatus::AwaitingReview
                {
                    return Ok(());
                }
                workflow
            }
            None => {
                let workflow = Workflow::new(
                    workflow_id,
                    &source_id,
                    "unknown",
                    serde_json::Value::Null,
                    self.config.workflow_deadline(),
                    &self.clock,
                );
                create_workflow(&self.store, workflow.clone()).await?;
                workflow
            }
        };
        let error = NodeError::new(last_error.kind, last_error.detail);
        self.finalize_failed(&workflow_id, workflow.current_node, error, true, None).await?;
        Ok(())
    }

    async fn advertise_claims(&self, workflow_id: &WorkflowId, output: &serde_json::Value) {
        let Some(claims) = output.get("claims") else {
            return;
        };
        let Ok(claims) = serde_json::from_value::<Vec<Claim>>(claims.clone()) else {
            return;
        };
        for claim in &claims {
            if let Err(e) = self.gateway.publish_claim(workflow_id, claim).await {
                tracing::warn!(workflow_id = %workflow_id, error = %e, "claim advertisement failed");
            }
        }
    }

    async fn emit_status(
        &self,
        workflow_id: &WorkflowId,
        from: WorkflowStatus,
        to: WorkflowStatus,
    ) {
        let event = NotificationEvent::StatusChanged {
            workflow_id: *workflow_id,
            from,
            to,
            at_ms: self.clock.epoch_ms(),
        };
        if let Err(e) = publish_event(&self.store, &event).await {
            tracing::warn!(workflow_id = %workflow_id, error = %e, "status broadcast failed");
        }
    }

    async fn ack_round(&self, delivery: Option<&Delivery>) -> Result<(), EngineError> {
        if let Some(delivery) = delivery {
            self.gateway.ack(CONSUMER_GROUP, delivery).await?;
        }
        Ok(())
    }

    async fn load_required(&self, workflow_id: &WorkflowId) -> Result<Workflow, EngineError> {
        load_workflow(&self.store, workflow_id)
            .await?
            .ok_or(EngineError::NotFound(*workflow_id))
    }
}

/// Extract the claim list from the claim-extraction result.
fn parse_claims(workflow: &Workflow) -> Result<Vec<Claim>, NodeError> {
    let Some(output) = workflow.results.get(&Stage::ClaimExtract.result_key()) else {
        return Err(NodeError::validation("merge reached without claim extraction output"));
    };
    let Some(raw) = output.get("claims") else {
        return Err(NodeError::validation("claim extraction output missing claims list"));
    };
    serde_json::from_value(raw.clone())
        .map_err(|e| NodeError::validation(format!("claims list malformed: {e}")))
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
pub(crate) mod tests;
