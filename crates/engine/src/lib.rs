// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! vg-engine: node runtime, orchestrator, review coordinator, and recovery.
//!
//! The orchestrator exclusively owns authoritative workflow mutation; every
//! write goes through CAS on the record version, and every node completion
//! is checkpointed before the inbound offset is committed.

mod backoff;
mod collab;
mod error;
mod fanout;
mod lease;
mod ops;
mod orchestrator;
mod recovery;
mod review;
mod runtime;
mod state;

pub use backoff::backoff_delay;
#[cfg(any(test, feature = "test-support"))]
pub use collab::FakeCollaborator;
pub use collab::{Collaborator, Collaborators, StageInput};
pub use error::EngineError;
pub use lease::{acquire_lease, is_owned, release_lease, renew_lease};
pub use ops::{cancel, status, OpsError};
pub use orchestrator::{fingerprint, Orchestrator, RoundEnd, CONSUMER_GROUP};
pub use recovery::recover_orphans;
pub use review::{ReviewCoordinator, ReviewError, ReviewPage, ReviewTask};
pub use runtime::NodeRuntime;
pub use state::{
    apply_terminal_ttl, create_workflow, load_workflow, publish_event, update_workflow,
    write_checkpoint,
};
