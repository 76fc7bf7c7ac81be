// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-visible message types: bus payloads and observer notifications.

use crate::error::ErrorKind;
use crate::workflow::{ReviewDecision, WorkflowId, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Externally produced item delivered on `raw-items`. Immutable input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    /// Stable across retries; dedup key.
    pub source_id: String,
    pub source: String,
    /// Opaque to the orchestrator until the normalize stage.
    pub payload: serde_json::Value,
    pub ingested_at: DateTime<Utc>,
}

/// Alert severity on the `alerts` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

crate::simple_display! {
    Severity {
        Info => "info",
        Warn => "warn",
        Critical => "critical",
    }
}

/// What an alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ReviewRequested,
    ReviewReminder,
    WorkflowFailed,
}

crate::simple_display! {
    AlertKind {
        ReviewRequested => "review_requested",
        ReviewReminder => "review_reminder",
        WorkflowFailed => "workflow_failed",
    }
}

impl AlertKind {
    pub fn severity(&self) -> Severity {
        match self {
            AlertKind::ReviewRequested | AlertKind::ReviewReminder => Severity::Warn,
            AlertKind::WorkflowFailed => Severity::Critical,
        }
    }
}

/// Outbound message on the `alerts` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub workflow_id: WorkflowId,
    pub kind: AlertKind,
    pub severity: Severity,
    pub summary: String,
    pub at: DateTime<Utc>,
}

impl AlertMessage {
    pub fn new(
        workflow_id: WorkflowId,
        kind: AlertKind,
        summary: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self { workflow_id, kind, severity: kind.severity(), summary: summary.into(), at }
    }
}

/// Outbound message on the `notifications` topic (terminal + milestone).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub workflow_id: WorkflowId,
    pub kind: String,
    pub severity: Severity,
    /// Partition key; "broadcast" unless scoped to one recipient.
    pub recipient_scope: String,
    pub summary: String,
    pub at: DateTime<Utc>,
}

/// The last classified failure of a dead-lettered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub detail: String,
}

/// Envelope wrapping a poison message routed to `dlq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEnvelope {
    pub original_topic: String,
    pub original_partition: u32,
    pub original_offset: u64,
    pub first_seen_at: DateTime<Utc>,
    pub last_error: LastError,
    pub attempts: u32,
}

/// Transient state-transition broadcast for observers.
///
/// At-most-once, never authoritative; subscribers reconcile against the
/// state store on reconnect. Serialized `{"type": "...", ...fields}`;
/// unknown tags deserialize to `Unknown` for forward compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NotificationEvent {
    #[serde(rename = "status_changed")]
    StatusChanged {
        workflow_id: WorkflowId,
        from: WorkflowStatus,
        to: WorkflowStatus,
        at_ms: u64,
    },

    #[serde(rename = "risk_scored")]
    RiskScored { workflow_id: WorkflowId, risk_score: f64, at_ms: u64 },

    #[serde(rename = "review_requested")]
    ReviewRequested { workflow_id: WorkflowId, risk_score: f64, at_ms: u64 },

    #[serde(rename = "review_decided")]
    ReviewDecided {
        workflow_id: WorkflowId,
        decision: ReviewDecision,
        decided_by: String,
        at_ms: u64,
    },

    #[serde(rename = "completed")]
    Completed { workflow_id: WorkflowId, at_ms: u64 },

    #[serde(rename = "failed")]
    Failed { workflow_id: WorkflowId, kind: ErrorKind, at_ms: u64 },

    /// Injected marker when a subscriber's queue overflowed; the subscriber
    /// is expected to resync from the state store.
    #[serde(rename = "lag")]
    Lag { dropped: u64, at_ms: u64 },

    /// Catch-all for unknown event types (extensibility)
    #[serde(other, skip_serializing)]
    Unknown,
}

impl NotificationEvent {
    /// Workflow this event concerns, when it concerns exactly one.
    pub fn workflow_id(&self) -> Option<WorkflowId> {
        match self {
            NotificationEvent::StatusChanged { workflow_id, .. }
            | NotificationEvent::RiskScored { workflow_id, .. }
            | NotificationEvent::ReviewRequested { workflow_id, .. }
            | NotificationEvent::ReviewDecided { workflow_id, .. }
            | NotificationEvent::Completed { workflow_id, .. }
            | NotificationEvent::Failed { workflow_id, .. } => Some(*workflow_id),
            NotificationEvent::Lag { .. } | NotificationEvent::Unknown => None,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
