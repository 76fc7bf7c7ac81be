// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CAS-guarded workflow persistence and observer broadcasting.

use crate::error::EngineError;
use std::sync::Arc;
use std::time::Duration;
use vg_core::{Checkpoint, NotificationEvent, Workflow, WorkflowId};
use vg_store::{decode, encode, keys, StateStore, StoreError};

/// Conflicting CAS attempts tolerated before giving up on a workflow.
const CAS_RETRY_CAP: usize = 5;

/// Load a workflow, syncing the in-record version with the store version.
pub async fn load_workflow(
    store: &Arc<dyn StateStore>,
    workflow_id: &WorkflowId,
) -> Result<Option<Workflow>, EngineError> {
    let Some(versioned) = store.get(&keys::wf_state(workflow_id)).await? else {
        return Ok(None);
    };
    let mut workflow: Workflow = decode(&versioned.data)?;
    workflow.version = versioned.version;
    Ok(Some(workflow))
}

/// Create the workflow record; fails on a concurrent create.
pub async fn create_workflow(
    store: &Arc<dyn StateStore>,
    mut workflow: Workflow,
) -> Result<Workflow, EngineError> {
    workflow.version = 1;
    let blob = encode(&workflow)?;
    store.cas(&keys::wf_state(&workflow.workflow_id), 0, blob, None).await?;
    Ok(workflow)
}

/// Read-modify-write a workflow behind CAS, re-reading on conflict.
///
/// Persistent conflict past the cap is a consistency loss; the caller
/// fails the workflow rather than guessing.
pub async fn update_workflow<F>(
    store: &Arc<dyn StateStore>,
    workflow_id: &WorkflowId,
    mutate: F,
) -> Result<Workflow, EngineError>
where
    F: Fn(&mut Workflow) -> Result<(), EngineError>,
{
    for _ in 0..CAS_RETRY_CAP {
        let Some(mut workflow) = load_workflow(store, workflow_id).await? else {
            return Err(EngineError::NotFound(*workflow_id));
        };
        let expected = workflow.version;
        mutate(&mut workflow)?;
        workflow.version = expected + 1;
        let blob = encode(&workflow)?;
        match store.cas(&keys::wf_state(workflow_id), expected, blob, None).await {
            Ok(_) => return Ok(workflow),
            Err(StoreError::VersionConflict { .. }) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(EngineError::ConsistencyLost(*workflow_id))
}

/// Write the checkpoint for a completing node. Synchronous with respect to
/// announcement: callers only publish or commit offsets after this returns.
pub async fn write_checkpoint(
    store: &Arc<dyn StateStore>,
    checkpoint: &Checkpoint,
) -> Result<(), EngineError> {
    let key = keys::wf_ckpt(&checkpoint.workflow_id, checkpoint.node);
    store.put(&key, encode(checkpoint)?, None).await?;
    Ok(())
}

/// Bound checkpoint and state retention once a workflow is terminal.
pub async fn apply_terminal_ttl(
    store: &Arc<dyn StateStore>,
    workflow_id: &WorkflowId,
    ttl: Duration,
) -> Result<(), EngineError> {
    store.extend_ttl(&keys::wf_state(workflow_id), ttl).await?;
    for (key, _) in store.scan_prefix(&keys::wf_ckpt_prefix(workflow_id)).await? {
        store.extend_ttl(&key, ttl).await?;
    }
    Ok(())
}

/// Broadcast a transient observer event on the store's pub/sub channel.
/// Best-effort by design; never authoritative.
pub async fn publish_event(
    store: &Arc<dyn StateStore>,
    event: &NotificationEvent,
) -> Result<(), EngineError> {
    store.publish(keys::EVENTS_CHANNEL, encode(event)?).await?;
    Ok(())
}
