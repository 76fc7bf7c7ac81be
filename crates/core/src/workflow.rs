// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow identifier, record, and state machine.

use crate::clock::Clock;
use crate::error::ErrorEntry;
use crate::stage::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

crate::define_id! {
    /// Unique identifier for a workflow.
    ///
    /// Deterministic per source item: the suffix is derived from a
    /// fingerprint of the item's `source_id`, so redelivered items collapse
    /// onto the same workflow.
    pub struct WorkflowId("wfl-");
}

impl WorkflowId {
    /// Build the deterministic ID from a precomputed source fingerprint
    /// (hex digest; the first 19 characters are used).
    pub fn from_fingerprint(hex_digest: &str) -> Self {
        Self::from_string(format!("{}{}", Self::PREFIX, crate::id::short(hex_digest, 19)))
    }
}

crate::define_id! {
    /// Unique identifier for an extracted claim.
    pub struct ClaimId("clm-");
}

/// Status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, not yet claimed by an orchestrator
    Pending,
    /// An orchestrator is driving the pipeline
    Running,
    /// Parked for a human review decision
    AwaitingReview,
    /// Review decided; resumption in progress
    Resuming,
    /// Terminal: pipeline finished (or review rejected)
    Completed,
    /// Terminal: node failed terminally or retries exhausted
    Failed,
    /// Terminal: cancelled externally or by review escalation
    Cancelled,
}

crate::simple_display! {
    WorkflowStatus {
        Pending => "pending",
        Running => "running",
        AwaitingReview => "awaiting_review",
        Resuming => "resuming",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }

    /// Whether the state machine permits `self → next`.
    ///
    /// Every status write goes through [`Workflow::transition`], which
    /// consults this table; out-of-order transitions are rejected rather
    /// than silently applied.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Running, AwaitingReview | Completed | Failed) => true,
            (AwaitingReview, Resuming) => true,
            (Resuming, Running | Completed) => true,
            // A poison message can fail a workflow that was never claimed.
            (Pending, Failed) => true,
            // Cancellation is valid from any non-terminal state.
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// An operator's review decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
    NeedsInvestigation,
}

crate::simple_display! {
    ReviewDecision {
        Approve => "approve",
        Reject => "reject",
        NeedsInvestigation => "needs_investigation",
    }
}

/// Short-lived operator claim preventing double-decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewLease {
    pub token: String,
    pub operator: String,
    pub expires_at_ms: u64,
}

impl ReviewLease {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Review bookkeeping attached to a workflow once it parks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub requested_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<ReviewDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<ReviewLease>,
    /// Epoch ms of the last overdue reminder, to pace the alert loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reminder_at_ms: Option<u64>,
}

/// One claim extracted from an item's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: ClaimId,
    pub text: String,
    /// Byte span within the normalized text.
    pub span: (usize, usize),
}

/// Result slot for one claim's sub-pipeline, indexed by extraction order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimOutcome {
    pub claim: Claim,
    /// Output of the last claim stage, when the sub-pipeline succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Fatal error, when it did not. Never set together with `result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::error::NodeError>,
}

impl ClaimOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_some()
    }
}

/// Rejected status write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition {from} -> {to}")]
pub struct TransitionError {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
}

/// The authoritative record tracking one item through the pipeline.
///
/// Only the owning orchestrator mutates this record, always behind CAS on
/// `version`; every other component reads snapshots or receives broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// CAS guard. First field so any reader can version-check the blob.
    pub version: u64,
    pub workflow_id: WorkflowId,
    /// Stable key of the originating item; dedup collapses on this.
    pub source_id: String,
    pub source: String,
    /// Raw item payload, kept durable so any node can be re-driven from
    /// persisted state alone after a crash.
    pub payload: serde_json::Value,
    pub status: WorkflowStatus,
    pub current_node: Stage,
    /// Stage outputs keyed by [`Stage::result_key`]. Written exactly once
    /// per successful node run.
    pub results: BTreeMap<String, serde_json::Value>,
    /// Append-only failure log.
    pub errors: Vec<ErrorEntry>,
    /// Retries per stage key.
    pub retry_counts: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewRecord>,
    /// Cancel tombstone; observed by the node runtime at attempt boundaries.
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    /// Workflow-wide deadline; pushed out by time spent awaiting review.
    pub deadline_ms: u64,
}

impl Workflow {
    /// Create a pending workflow for a source item.
    pub fn new(
        workflow_id: WorkflowId,
        source_id: impl Into<String>,
        source: impl Into<String>,
        payload: serde_json::Value,
        deadline: std::time::Duration,
        clock: &impl Clock,
    ) -> Self {
        let now = clock.epoch_ms();
        Self {
            version: 0,
            workflow_id,
            source_id: source_id.into(),
            source: source.into(),
            payload,
            status: WorkflowStatus::Pending,
            current_node: Stage::FIRST,
            results: BTreeMap::new(),
            errors: Vec::new(),
            retry_counts: BTreeMap::new(),
            risk_score: None,
            review: None,
            cancel_requested: false,
            created_at_ms: now,
            updated_at_ms: now,
            deadline_ms: now + deadline.as_millis() as u64,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a status transition, rejecting anything the table forbids.
    pub fn transition(&mut self, to: WorkflowStatus, now_ms: u64) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError { from: self.status, to });
        }
        self.status = to;
        self.updated_at_ms = now_ms;
        Ok(())
    }

    /// Record a stage output.
    ///
    /// Returns `false` (without writing) when the key is already present:
    /// a rerun after an acknowledged write must not clobber the result.
    pub fn record_result(&mut self, stage: Stage, output: serde_json::Value, now_ms: u64) -> bool {
        let key = stage.result_key();
        if self.results.contains_key(&key) {
            return false;
        }
        self.results.insert(key, output);
        self.updated_at_ms = now_ms;
        true
    }

    /// Append to the error log and bump the stage's retry counter when the
    /// entry represents a re-attempt.
    pub fn record_error(&mut self, entry: ErrorEntry) {
        let at_ms = entry.at_ms;
        if entry.kind.is_retryable() {
            *self.retry_counts.entry(entry.node.result_key()).or_insert(0) += 1;
        }
        self.errors.push(entry);
        self.updated_at_ms = at_ms;
    }

    /// Park for review: sets the record and status in one step.
    pub fn request_review(&mut self, now_ms: u64) -> Result<(), TransitionError> {
        self.transition(WorkflowStatus::AwaitingReview, now_ms)?;
        self.review = Some(ReviewRecord { requested_at_ms: now_ms, ..ReviewRecord::default() });
        Ok(())
    }

    /// Push the workflow deadline out by the time spent parked in review,
    /// so review latency never counts against the processing budget.
    pub fn credit_review_pause(&mut self, now_ms: u64) {
        if let Some(review) = &self.review {
            self.deadline_ms += now_ms.saturating_sub(review.requested_at_ms);
        }
    }

    pub fn is_past_deadline(&self, now_ms: u64) -> bool {
        now_ms > self.deadline_ms
    }
}

/// Durable record of a node's completion, sufficient to resume after the
/// completing node without rerunning it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub workflow_id: WorkflowId,
    pub node: Stage,
    pub attempt: u32,
    pub snapshot: Workflow,
}

crate::builder! {
    pub struct WorkflowBuilder => Workflow {
        into {
            source_id: String = "src-test-1",
            source: String = "test-feed",
        }
        set {
            version: u64 = 1,
            workflow_id: WorkflowId = WorkflowId::from_fingerprint("0123456789abcdef0123456789abcdef"),
            payload: serde_json::Value = serde_json::json!({"text": "calm"}),
            status: WorkflowStatus = WorkflowStatus::Running,
            current_node: Stage = Stage::Normalize,
            results: BTreeMap<String, serde_json::Value> = BTreeMap::new(),
            errors: Vec<ErrorEntry> = Vec::new(),
            retry_counts: BTreeMap<String, u32> = BTreeMap::new(),
            cancel_requested: bool = false,
            created_at_ms: u64 = 1_000_000,
            updated_at_ms: u64 = 1_000_000,
            deadline_ms: u64 = 2_800_000,
        }
        option {
            risk_score: f64 = None,
            review: ReviewRecord = None,
        }
    }
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "workflow_prop_tests.rs"]
mod prop_tests;
