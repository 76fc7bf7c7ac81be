// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The closed error taxonomy shared by every stage and plane.
//!
//! Stages never raise ad-hoc errors: any residual failure is classified
//! into one of these kinds at the node-runtime boundary, and the
//! orchestrator decides terminal disposition from the kind alone.

use crate::stage::Stage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient; the node runtime retries with backoff.
    Retryable,
    /// Input rejected; no retry, the workflow fails.
    Validation,
    /// Wall-clock deadline exceeded; counts as retryable up to the cap.
    Timeout,
    /// Upstream collaborator is permanently broken; no retry.
    PermanentUpstreamFailure,
    /// Cancel tombstone observed; terminates the node.
    Cancelled,
    /// Every per-claim sub-pipeline failed at merge.
    AllClaimsFailed,
    /// CAS conflicts persisted past the retry cap.
    ConsistencyLost,
    /// Bus unreachable; backoff at the supervisor, no state mutation.
    BusUnavailable,
    /// Bus credentials rejected; fatal at the supervisor.
    AuthError,
}

crate::simple_display! {
    ErrorKind {
        Retryable => "retryable",
        Validation => "validation",
        Timeout => "timeout",
        PermanentUpstreamFailure => "permanent_upstream_failure",
        Cancelled => "cancelled",
        AllClaimsFailed => "all_claims_failed",
        ConsistencyLost => "consistency_lost",
        BusUnavailable => "bus_unavailable",
        AuthError => "auth_error",
    }
}

impl ErrorKind {
    /// Whether the node runtime may retry an attempt that failed this way.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Retryable | ErrorKind::Timeout)
    }
}

/// A classified stage failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {detail}")]
pub struct NodeError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl NodeError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self { kind, detail: detail.into() }
    }

    pub fn retryable(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Retryable, detail)
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, detail)
    }

    pub fn upstream(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermanentUpstreamFailure, detail)
    }

    pub fn cancelled(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, detail)
    }
}

/// One entry in a workflow's append-only error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub node: Stage,
    pub kind: ErrorKind,
    pub detail: String,
    pub attempt: u32,
    pub at_ms: u64,
}

impl ErrorEntry {
    pub fn from_node_error(node: Stage, error: &NodeError, attempt: u32, at_ms: u64) -> Self {
        Self { node, kind: error.kind, detail: error.detail.clone(), attempt, at_ms }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
