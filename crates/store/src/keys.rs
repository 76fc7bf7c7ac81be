// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key and channel namespaces.
//!
//! Values are opaque binary blobs to any consumer other than the
//! orchestrator; the version travels alongside the blob (see
//! [`crate::Versioned`]).

use vg_core::{Stage, WorkflowId};

/// Authoritative workflow record.
pub fn wf_state(id: &WorkflowId) -> String {
    format!("wf:state:{id}")
}

/// Prefix scanning all workflow records.
pub const WF_STATE_PREFIX: &str = "wf:state:";

/// Checkpoint for one completed node.
pub fn wf_ckpt(id: &WorkflowId, node: Stage) -> String {
    format!("wf:ckpt:{id}:{node}")
}

/// Prefix scanning one workflow's checkpoints.
pub fn wf_ckpt_prefix(id: &WorkflowId) -> String {
    format!("wf:ckpt:{id}:")
}

/// Dedup token claimed on first delivery of a source item.
pub fn wf_lock(source_id: &str) -> String {
    format!("wf:lock:{source_id}")
}

/// Owner-lease marking which orchestrator currently drives a workflow.
pub fn wf_owner(id: &WorkflowId) -> String {
    format!("wf:owner:{id}")
}

/// Prefix scanning all owner-leases.
pub const WF_OWNER_PREFIX: &str = "wf:owner:";

/// Pub/sub channel carrying every observer-visible state transition.
pub const EVENTS_CHANNEL: &str = "wf:events";

/// Pub/sub channel signalling review decisions to parked orchestrators.
pub const REVIEW_DECIDED_CHANNEL: &str = "review:decided";
