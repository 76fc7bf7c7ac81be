// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator surface: status snapshots and cancellation.

use crate::error::EngineError;
use crate::state::{load_workflow, publish_event, update_workflow};
use std::sync::Arc;
use thiserror::Error;
use vg_core::{Clock, NotificationEvent, Workflow, WorkflowId, WorkflowStatus};
use vg_store::StateStore;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("not found")]
    NotFound,
    #[error("terminal")]
    Terminal,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Read-only workflow snapshot.
pub async fn status(
    store: &Arc<dyn StateStore>,
    workflow_id: &WorkflowId,
) -> Result<Workflow, OpsError> {
    load_workflow(store, workflow_id).await?.ok_or(OpsError::NotFound)
}

/// Request cancellation.
///
/// Parked and pending workflows cancel immediately; a running workflow gets
/// a tombstone its node runtime observes at the next attempt boundary.
/// Terminal workflows reject the request.
pub async fn cancel(
    store: &Arc<dyn StateStore>,
    workflow_id: &WorkflowId,
    clock: &impl Clock,
) -> Result<(), OpsError> {
    let workflow = load_workflow(store, workflow_id).await?.ok_or(OpsError::NotFound)?;
    if workflow.is_terminal() {
        return Err(OpsError::Terminal);
    }

    let now = clock.epoch_ms();
    let from = workflow.status;
    let updated = update_workflow(store, workflow_id, |wf| {
        match wf.status {
            // Terminal since our read: nothing to do, report Terminal below.
            status if status.is_terminal() => {}
            WorkflowStatus::AwaitingReview | WorkflowStatus::Pending => {
                wf.transition(WorkflowStatus::Cancelled, now)?;
            }
            _ => wf.cancel_requested = true,
        }
        Ok(())
    })
    .await?;

    if from != WorkflowStatus::Pending && from != WorkflowStatus::AwaitingReview {
        // Tombstone set; the driving orchestrator finishes the job.
        return Ok(());
    }
    if updated.status != WorkflowStatus::Cancelled {
        return Err(OpsError::Terminal);
    }
    store.review_remove(workflow_id.as_str()).await.map_err(EngineError::from)?;
    let event = NotificationEvent::StatusChanged {
        workflow_id: *workflow_id,
        from,
        to: WorkflowStatus::Cancelled,
        at_ms: now,
    };
    publish_event(store, &event).await?;
    tracing::info!(workflow_id = %workflow_id, "cancelled by operator");
    Ok(())
}

#[cfg(test)]
#[path = "ops_tests.rs"]
mod tests;
