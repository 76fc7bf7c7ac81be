// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup recovery: adopt in-flight workflows whose owner died.
//!
//! The authoritative record is written before its checkpoint, so a live
//! record is already positioned at the next node to run; the checkpoint is
//! the fallback when the record itself is unreadable.

use crate::error::EngineError;
use crate::lease;
use crate::orchestrator::Orchestrator;
use crate::state::create_workflow;
use vg_bus::MessageBus;
use vg_core::{Checkpoint, Clock, Workflow, WorkflowStatus};
use vg_store::{decode, keys};

/// Scan for owner-less in-flight workflows and drive each to its next
/// park or terminal state. Returns how many were adopted.
pub async fn recover_orphans<B: MessageBus, C: Clock + 'static>(
    orchestrator: &Orchestrator<B, C>,
) -> Result<usize, EngineError> {
    let store = orchestrator.store().clone();
    let mut adopted = 0;

    for (key, versioned) in store.scan_prefix(keys::WF_STATE_PREFIX).await? {
        let workflow: Workflow = match decode(&versioned.data) {
            Ok(workflow) => workflow,
            Err(e) => {
                // Record unreadable: rebuild from the newest checkpoint.
                tracing::warn!(key, error = %e, "unreadable workflow record");
                match restore_from_checkpoint(orchestrator, &key).await? {
                    Some(workflow) => workflow,
                    None => continue,
                }
            }
        };

        if !matches!(workflow.status, WorkflowStatus::Running | WorkflowStatus::Resuming) {
            continue;
        }
        if lease::is_owned(&store, &workflow.workflow_id).await? {
            continue;
        }

        tracing::info!(
            workflow_id = %workflow.workflow_id,
            node = %workflow.current_node,
            status = %workflow.status,
            "recovering orphaned workflow"
        );
        adopted += 1;
        if let Err(e) = orchestrator.resume(&workflow.workflow_id).await {
            tracing::error!(workflow_id = %workflow.workflow_id, error = %e, "recovery failed");
        }
    }
    Ok(adopted)
}

/// Rebuild a workflow record from its newest checkpoint snapshot.
async fn restore_from_checkpoint<B: MessageBus, C: Clock + 'static>(
    orchestrator: &Orchestrator<B, C>,
    state_key: &str,
) -> Result<Option<Workflow>, EngineError> {
    let store = orchestrator.store().clone();
    let Some(id_part) = state_key.strip_prefix(keys::WF_STATE_PREFIX) else {
        return Ok(None);
    };
    let workflow_id = vg_core::WorkflowId::from_string(id_part);

    let mut newest: Option<Checkpoint> = None;
    for (_, versioned) in store.scan_prefix(&keys::wf_ckpt_prefix(&workflow_id)).await? {
        let Ok(checkpoint) = decode::<Checkpoint>(&versioned.data) else {
            continue;
        };
        if newest
            .as_ref()
            .is_none_or(|best| checkpoint.snapshot.version > best.snapshot.version)
        {
            newest = Some(checkpoint);
        }
    }
    let Some(checkpoint) = newest else {
        return Ok(None);
    };

    // Resume from the node after the checkpointed one.
    let mut restored = checkpoint.snapshot;
    if let Some(next) = checkpoint.node.next() {
        restored.current_node = next;
    }
    store.delete(state_key).await?;
    let restored = create_workflow(&store, restored).await?;
    tracing::info!(
        workflow_id = %workflow_id,
        node = %restored.current_node,
        "rebuilt workflow from checkpoint"
    );
    Ok(Some(restored))
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
