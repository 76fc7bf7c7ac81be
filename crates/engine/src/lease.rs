// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Owner-leases: short-lived tokens marking which orchestrator currently
//! drives a workflow. A lease that is not renewed expires with its TTL,
//! which is what lets the recovery pass adopt orphans.

use std::sync::Arc;
use std::time::Duration;
use vg_core::WorkflowId;
use vg_store::{keys, StateStore, StoreError};

/// Try to take (or refresh) the lease. Returns `false` when another live
/// owner holds it.
pub async fn acquire_lease(
    store: &Arc<dyn StateStore>,
    workflow_id: &WorkflowId,
    owner: &str,
    ttl: Duration,
) -> Result<bool, StoreError> {
    let key = keys::wf_owner(workflow_id);
    match store.get(&key).await? {
        Some(current) => {
            if current.data == owner.as_bytes() {
                store.extend_ttl(&key, ttl).await?;
                Ok(true)
            } else {
                Ok(false)
            }
        }
        None => match store.cas(&key, 0, owner.as_bytes().to_vec(), Some(ttl)).await {
            Ok(_) => Ok(true),
            Err(StoreError::VersionConflict { .. }) => Ok(false),
            Err(e) => Err(e),
        },
    }
}

/// Keep a held lease alive.
pub async fn renew_lease(
    store: &Arc<dyn StateStore>,
    workflow_id: &WorkflowId,
    ttl: Duration,
) -> Result<(), StoreError> {
    store.extend_ttl(&keys::wf_owner(workflow_id), ttl).await
}

/// Release the lease if this owner still holds it.
pub async fn release_lease(
    store: &Arc<dyn StateStore>,
    workflow_id: &WorkflowId,
    owner: &str,
) -> Result<(), StoreError> {
    let key = keys::wf_owner(workflow_id);
    if let Some(current) = store.get(&key).await? {
        if current.data == owner.as_bytes() {
            store.delete(&key).await?;
        }
    }
    Ok(())
}

/// Whether any live owner currently drives the workflow.
pub async fn is_owned(
    store: &Arc<dyn StateStore>,
    workflow_id: &WorkflowId,
) -> Result<bool, StoreError> {
    Ok(store.get(&keys::wf_owner(workflow_id)).await?.is_some())
}
