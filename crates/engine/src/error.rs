// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;
use vg_bus::BusError;
use vg_core::{TransitionError, WorkflowId};
use vg_store::StoreError;

/// Errors that can occur while driving workflows.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("workflow not found: {0}")]
    NotFound(WorkflowId),
    #[error("consistency lost on {0}")]
    ConsistencyLost(WorkflowId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("serialization: {0}")]
    Serialization(String),
}
