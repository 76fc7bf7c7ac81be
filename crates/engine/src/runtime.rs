// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The node runtime: uniform timeout, retry, and error-classification
//! semantics around one pipeline stage.

use crate::backoff::backoff_delay;
use crate::collab::{Collaborators, StageInput};
use crate::error::EngineError;
use crate::state::{load_workflow, update_workflow};
use std::sync::Arc;
use vg_core::{
    Claim, Clock, ErrorEntry, ErrorKind, NodeError, Stage, VigilConfig, Workflow, WorkflowId,
};
use vg_store::StateStore;

/// Executes single stages with retry, timeout, and atomic error reporting.
///
/// Cheap to clone; claim fan-out tasks each carry one.
pub struct NodeRuntime<C: Clock> {
    store: Arc<dyn StateStore>,
    collabs: Arc<Collaborators>,
    config: Arc<VigilConfig>,
    clock: C,
}

impl<C: Clock> Clone for NodeRuntime<C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            collabs: self.collabs.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<C: Clock> NodeRuntime<C> {
    pub fn new(
        store: Arc<dyn StateStore>,
        collabs: Arc<Collaborators>,
        config: Arc<VigilConfig>,
        clock: C,
    ) -> Self {
        Self { store, collabs, config, clock }
    }

    pub fn config(&self) -> &Arc<VigilConfig> {
        &self.config
    }

    /// Run one stage to completion or a terminal error.
    ///
    /// Retryable failures (including timeouts) are re-attempted with
    /// backoff up to the configured cap; every failed attempt is appended
    /// to the workflow's error log behind CAS before the next attempt
    /// starts. The cancel tombstone is observed at attempt boundaries.
    pub async fn run_stage(
        &self,
        workflow_id: &WorkflowId,
        stage: Stage,
        claim: Option<Claim>,
    ) -> Result<serde_json::Value, NodeError> {
        let max_attempts = self.config.retry_max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            let workflow = match self.load(workflow_id).await {
                Ok(workflow) => workflow,
                Err(e) => return Err(e),
            };
            if workflow.cancel_requested {
                return Err(NodeError::cancelled("cancel requested"));
            }

            let input = StageInput {
                workflow_id: *workflow_id,
                stage,
                attempt,
                payload: workflow.payload.clone(),
                results: workflow.results.clone(),
                claim: claim.clone(),
            };
            let error = match self.attempt_stage(input).await {
                Ok(output) => return Ok(output),
                Err(error) => error,
            };

            tracing::warn!(
                workflow_id = %workflow_id,
                node = %stage,
                attempt,
                kind = %error.kind,
                "stage attempt failed: {}",
                error.detail
            );
            self.report_error(workflow_id, stage, &error, attempt).await?;

            if !error.kind.is_retryable() || attempt >= max_attempts {
                return Err(error);
            }
            tokio::time::sleep(backoff_delay(&self.config, attempt, workflow_id.as_str()))
                .await;
            attempt += 1;
        }
    }

    /// One attempt: invoke the collaborator under the stage deadline and
    /// classify any residual failure into the closed taxonomy.
    async fn attempt_stage(&self, input: StageInput) -> Result<serde_json::Value, NodeError> {
        let stage = input.stage;
        let Some(collaborator) = self.collabs.get(stage) else {
            return Err(NodeError::validation(format!("no collaborator bound for {stage}")));
        };
        let deadline = self.config.node_timeout(stage);
        match tokio::time::timeout(deadline, collaborator.apply(input)).await {
            Ok(result) => result,
            Err(_) => Err(NodeError::timeout(format!(
                "{stage} exceeded {} ms",
                deadline.as_millis()
            ))),
        }
    }

    async fn load(&self, workflow_id: &WorkflowId) -> Result<Workflow, NodeError> {
        match load_workflow(&self.store, workflow_id).await {
            Ok(Some(workflow)) => Ok(workflow),
            Ok(None) => {
                Err(NodeError::validation(format!("workflow {workflow_id} missing")))
            }
            Err(e) => Err(NodeError::retryable(format!("state store: {e}"))),
        }
    }

    /// Append the error and bump the retry counter atomically.
    async fn report_error(
        &self,
        workflow_id: &WorkflowId,
        stage: Stage,
        error: &NodeError,
        attempt: u32,
    ) -> Result<(), NodeError> {
        let at_ms = self.clock.epoch_ms();
        let result = update_workflow(&self.store, workflow_id, |workflow| {
            workflow.record_error(ErrorEntry::from_node_error(stage, error, attempt, at_ms));
            Ok(())
        })
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(EngineError::ConsistencyLost(_)) => Err(NodeError::new(
                ErrorKind::ConsistencyLost,
                format!("error log write for {stage} kept conflicting"),
            )),
            Err(e) => Err(NodeError::retryable(format!("error log write failed: {e}"))),
        }
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
