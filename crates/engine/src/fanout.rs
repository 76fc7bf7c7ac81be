// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-claim parallel fan-out with deterministic merge.
//!
//! Each claim runs the claim sub-pipeline in its own task under a
//! parallelism bound; results land in pre-allocated slots indexed by
//! extraction order, so the merged output is stable regardless of
//! completion order.

use crate::runtime::NodeRuntime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use std::sync::Arc;
use vg_core::{Claim, ClaimOutcome, Clock, ErrorKind, NodeError, WorkflowId, CLAIM_STAGES};

/// Run every claim's sub-pipeline and merge in extraction order.
///
/// A failed claim is recorded in its slot without aborting the others;
/// only a full wipe-out surfaces as `AllClaimsFailed`. Zero claims merge
/// to an empty list.
pub(crate) async fn run_claim_fanout<C: Clock + 'static>(
    runtime: &NodeRuntime<C>,
    workflow_id: &WorkflowId,
    claims: Vec<Claim>,
    parallelism: usize,
) -> Result<Vec<ClaimOutcome>, NodeError> {
    if claims.is_empty() {
        return Ok(Vec::new());
    }

    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut tasks = JoinSet::new();
    for (index, claim) in claims.iter().cloned().enumerate() {
        let runtime = runtime.clone();
        let semaphore = semaphore.clone();
        let workflow_id = *workflow_id;
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (
                    index,
                    ClaimOutcome {
                        claim,
                        result: None,
                        error: Some(NodeError::cancelled("fan-out shut down")),
                    },
                );
            };
            (index, run_claim(&runtime, &workflow_id, claim).await)
        });
    }

    let mut slots: Vec<Option<ClaimOutcome>> = vec![None; claims.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => slots[index] = Some(outcome),
            Err(e) => tracing::error!(workflow_id = %workflow_id, "claim task died: {e}"),
        }
    }

    let outcomes: Vec<ClaimOutcome> = slots
        .into_iter()
        .zip(claims)
        .map(|(slot, claim)| {
            slot.unwrap_or_else(|| ClaimOutcome {
                claim,
                result: None,
                error: Some(NodeError::retryable("sub-pipeline aborted")),
            })
        })
        .collect();

    if outcomes.iter().all(|outcome| !outcome.succeeded()) {
        return Err(NodeError::new(
            ErrorKind::AllClaimsFailed,
            format!("all {} claim sub-pipelines failed", outcomes.len()),
        ));
    }
    Ok(outcomes)
}

/// Drive one claim through the sub-pipeline; first terminal error wins.
async fn run_claim<C: Clock + 'static>(
    runtime: &NodeRuntime<C>,
    workflow_id: &WorkflowId,
    claim: Claim,
) -> ClaimOutcome {
    let mut last_output = serde_json::Value::Null;
    for stage in CLAIM_STAGES {
        match runtime.run_stage(workflow_id, stage, Some(claim.clone())).await {
            Ok(output) => last_output = output,
            Err(error) => return ClaimOutcome { claim, result: None, error: Some(error) },
        }
    }
    ClaimOutcome { claim, result: Some(last_output), error: None }
}

#[cfg(test)]
#[path = "fanout_tests.rs"]
mod tests;
