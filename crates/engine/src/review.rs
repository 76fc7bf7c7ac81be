// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human review: the pending queue, operator leases, and decision intake.
//!
//! Decisions publish on the store's pub/sub channel so parked orchestrators
//! resume without polling.

use crate::error::EngineError;
use crate::state::{load_workflow, publish_event};
use std::sync::Arc;
use thiserror::Error;
use vg_core::{
    AlertKind, AlertMessage, Clock, NotificationEvent, ReviewDecision, ReviewLease,
    VigilConfig, Workflow, WorkflowId, WorkflowStatus,
};
use vg_store::{encode, keys, StateStore, StoreError};

/// Operator-facing view over one parked workflow. Derived, never stored.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReviewTask {
    pub workflow_id: WorkflowId,
    pub source: String,
    pub risk_score: f64,
    pub requested_at_ms: u64,
    /// Set when an operator currently holds the claim.
    pub claimed_by: Option<String>,
}

/// One page of pending reviews, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewPage {
    pub tasks: Vec<ReviewTask>,
    pub offset: usize,
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("not found")]
    NotFound,
    #[error("already claimed")]
    AlreadyClaimed,
    #[error("lease invalid")]
    LeaseInvalid,
    #[error("not awaiting review")]
    NotAwaitingReview,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<StoreError> for ReviewError {
    fn from(e: StoreError) -> Self {
        ReviewError::Engine(e.into())
    }
}

/// Coordinates operator review of parked workflows.
pub struct ReviewCoordinator<C: Clock> {
    store: Arc<dyn StateStore>,
    config: Arc<VigilConfig>,
    clock: C,
}

impl<C: Clock> ReviewCoordinator<C> {
    pub fn new(store: Arc<dyn StateStore>, config: Arc<VigilConfig>, clock: C) -> Self {
        Self { store, config, clock }
    }

    /// Page through pending reviews in request-time order.
    pub async fn list(&self, offset: usize, limit: usize) -> Result<ReviewPage, ReviewError> {
        let index = self.store.review_range(offset, limit).await?;
        let now = self.clock.epoch_ms();
        let mut tasks = Vec::with_capacity(index.len());
        for (id, requested_at_ms) in index {
            let workflow_id = WorkflowId::from_string(&id);
            let Some(workflow) = load_workflow(&self.store, &workflow_id).await? else {
                continue;
            };
            if workflow.status != WorkflowStatus::AwaitingReview {
                continue;
            }
            let claimed_by = workflow
                .review
                .as_ref()
                .and_then(|review| review.lease.as_ref())
                .filter(|lease| !lease.is_expired(now))
                .map(|lease| lease.operator.clone());
            tasks.push(ReviewTask {
                workflow_id,
                source: workflow.source.clone(),
                risk_score: workflow.risk_score.unwrap_or_default(),
                requested_at_ms,
                claimed_by,
            });
        }
        Ok(ReviewPage { tasks, offset })
    }

    /// Claim a pending review for an operator. The returned token must
    /// accompany the decision; the lease blocks double-decision.
    pub async fn claim(
        &self,
        workflow_id: &WorkflowId,
        operator: &str,
    ) -> Result<String, ReviewError> {
        let token = uuid::Uuid::new_v4().to_string();
        let now = self.clock.epoch_ms();
        let expires_at_ms = now + self.config.review_lease_ms;

        self.try_update(workflow_id, |wf| {
            let review = awaiting_review(wf)?;
            if let Some(lease) = &review.lease {
                if !lease.is_expired(now) && lease.operator != operator {
                    return Err(ReviewError::AlreadyClaimed);
                }
            }
            review.lease = Some(ReviewLease {
                token: token.clone(),
                operator: operator.to_string(),
                expires_at_ms,
            });
            Ok(())
        })
        .await?;
        Ok(token)
    }

    /// Record a decision and move the workflow to `Resuming`.
    ///
    /// Validates the lease, writes the decision fields and the transition
    /// in one CAS, removes the pending-index entry, and signals waiting
    /// orchestrators over pub/sub.
    pub async fn decide(
        &self,
        workflow_id: &WorkflowId,
        lease_token: &str,
        decision: ReviewDecision,
        feedback: Option<String>,
    ) -> Result<(), ReviewError> {
        let now = self.clock.epoch_ms();
        let updated = self
            .try_update(workflow_id, |wf| {
                let review = awaiting_review(wf)?;
                let valid = review
                    .lease
                    .as_ref()
                    .is_some_and(|lease| lease.token == lease_token && !lease.is_expired(now));
                if !valid {
                    return Err(ReviewError::LeaseInvalid);
                }
                let operator = review.lease.as_ref().map(|lease| lease.operator.clone());
                review.decision = Some(decision);
                review.decided_by = operator;
                review.feedback = feedback.clone();
                wf.transition(WorkflowStatus::Resuming, now).map_err(EngineError::from)?;
                Ok(())
            })
            .await?;

        self.store.review_remove(workflow_id.as_str()).await?;
        let decided_by = updated
            .review
            .as_ref()
            .and_then(|review| review.decided_by.clone())
            .unwrap_or_default();
        publish_event(
            &self.store,
            &NotificationEvent::ReviewDecided {
                workflow_id: *workflow_id,
                decision,
                decided_by,
                at_ms: now,
            },
        )
        .await?;
        // Wake parked orchestrators; the payload is the workflow id.
        self.store.publish(keys::REVIEW_DECIDED_CHANNEL, encode(&workflow_id)?).await?;
        tracing::info!(workflow_id = %workflow_id, decision = %decision, "review decided");
        Ok(())
    }

    /// Alerts for reviews past the decision deadline. No auto-decision:
    /// overdue workflows stay parked; reminders repeat per deadline window.
    pub async fn overdue_reminders(&self) -> Result<Vec<AlertMessage>, ReviewError> {
        let now = self.clock.epoch_ms();
        let deadline = self.config.review_deadline_ms;
        let mut reminders = Vec::new();
        for (id, requested_at_ms) in self.store.review_range(0, usize::MAX).await? {
            if now < requested_at_ms + deadline {
                continue;
            }
            let workflow_id = WorkflowId::from_string(&id);
            let Some(workflow) = load_workflow(&self.store, &workflow_id).await? else {
                continue;
            };
            if workflow.status != WorkflowStatus::AwaitingReview {
                continue;
            }
            let last = workflow
                .review
                .as_ref()
                .and_then(|review| review.last_reminder_at_ms)
                .unwrap_or(requested_at_ms);
            if now < last + deadline {
                continue;
            }
            self.try_update(&workflow_id, |wf| {
                if let Some(review) = wf.review.as_mut() {
                    review.last_reminder_at_ms = Some(now);
                }
                Ok(())
            })
            .await?;
            let at = chrono::DateTime::from_timestamp_millis(now as i64)
                .unwrap_or_else(chrono::Utc::now);
            reminders.push(AlertMessage::new(
                workflow_id,
                AlertKind::ReviewReminder,
                format!("review pending since {requested_at_ms}"),
                at,
            ));
        }
        Ok(reminders)
    }

    /// CAS loop with typed rejection: validation errors abort immediately,
    /// version conflicts re-read and re-validate.
    async fn try_update<F>(
        &self,
        workflow_id: &WorkflowId,
        mutate: F,
    ) -> Result<Workflow, ReviewError>
    where
        F: Fn(&mut Workflow) -> Result<(), ReviewError>,
    {
        for _ in 0..5 {
            let Some(mut workflow) = load_workflow(&self.store, workflow_id).await? else {
                return Err(ReviewError::NotFound);
            };
            let expected = workflow.version;
            mutate(&mut workflow)?;
            workflow.version = expected + 1;
            let blob = encode(&workflow)?;
            match self
                .store
                .cas(&keys::wf_state(workflow_id), expected, blob, None)
                .await
            {
                Ok(_) => return Ok(workflow),
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(ReviewError::Engine(EngineError::ConsistencyLost(*workflow_id)))
    }
}

/// The mutable review record of a workflow that is actually parked.
fn awaiting_review(workflow: &mut Workflow) -> Result<&mut vg_core::ReviewRecord, ReviewError> {
    if workflow.status != WorkflowStatus::AwaitingReview {
        return Err(ReviewError::NotAwaitingReview);
    }
    workflow.review.as_mut().ok_or(ReviewError::NotAwaitingReview)
}

#[cfg(test)]
#[path = "review_tests.rs"]
mod tests;
