// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The fixed verification pipeline: a closed set of stages.
//!
//! The pipeline shape never changes at runtime, so stages are a tagged
//! variant rather than a name-keyed registry: routing is exhaustive and the
//! compiler flags a missing arm when the set grows.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One stage of the verification pipeline.
///
/// The spine is linear:
/// `Normalize → EntityExtract → ClaimExtract → Merge → RiskScore →
/// (AwaitReview?) → DraftAdvisory → Translate → Publish`.
/// The three claim stages run per extracted claim between `ClaimExtract`
/// and `Merge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalize,
    EntityExtract,
    ClaimExtract,
    TopicAssign,
    EvidenceRetrieve,
    VeracityAssess,
    Merge,
    RiskScore,
    AwaitReview,
    DraftAdvisory,
    Translate,
    Publish,
}

crate::simple_display! {
    Stage {
        Normalize => "normalize",
        EntityExtract => "entity",
        ClaimExtract => "claims",
        TopicAssign => "topic",
        EvidenceRetrieve => "evidence",
        VeracityAssess => "veracity",
        Merge => "merge",
        RiskScore => "risk",
        AwaitReview => "await_review",
        DraftAdvisory => "draft",
        Translate => "translate",
        Publish => "publish",
    }
}

/// The per-claim sub-pipeline, in execution order.
pub const CLAIM_STAGES: [Stage; 3] =
    [Stage::TopicAssign, Stage::EvidenceRetrieve, Stage::VeracityAssess];

impl Stage {
    /// The first stage of every workflow.
    pub const FIRST: Stage = Stage::Normalize;

    /// Key under which this stage's output lands in `Workflow::results`.
    pub fn result_key(&self) -> String {
        self.to_string()
    }

    /// Successor on the low-risk spine. `None` after `Publish`.
    ///
    /// The risk branch is not encoded here: after `RiskScore` the
    /// orchestrator compares the score against the review threshold and may
    /// divert to `AwaitReview` before continuing at `DraftAdvisory`.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Normalize => Some(Stage::EntityExtract),
            Stage::EntityExtract => Some(Stage::ClaimExtract),
            Stage::ClaimExtract => Some(Stage::Merge),
            Stage::Merge => Some(Stage::RiskScore),
            Stage::RiskScore => Some(Stage::DraftAdvisory),
            Stage::AwaitReview => Some(Stage::DraftAdvisory),
            Stage::DraftAdvisory => Some(Stage::Translate),
            Stage::Translate => Some(Stage::Publish),
            Stage::Publish => None,
            // Claim stages chain within the sub-pipeline only.
            Stage::TopicAssign => Some(Stage::EvidenceRetrieve),
            Stage::EvidenceRetrieve => Some(Stage::VeracityAssess),
            Stage::VeracityAssess => None,
        }
    }

    /// True for stages executed once per extracted claim.
    pub fn is_claim_stage(&self) -> bool {
        CLAIM_STAGES.contains(self)
    }

    /// True for stages the node runtime executes through a collaborator.
    ///
    /// `Merge` and `AwaitReview` are orchestrator-internal: merge is a
    /// deterministic aggregation and the review pause runs no code.
    pub fn is_collaborator_stage(&self) -> bool {
        !matches!(self, Stage::Merge | Stage::AwaitReview)
    }

    /// Default wall-clock limit for one attempt of this stage.
    pub fn default_timeout(&self) -> Duration {
        let secs = match self {
            Stage::Normalize => 5,
            Stage::EntityExtract => 30,
            Stage::ClaimExtract => 30,
            Stage::TopicAssign => 30,
            Stage::EvidenceRetrieve => 60,
            Stage::VeracityAssess => 30,
            Stage::Merge => 5,
            Stage::RiskScore => 5,
            Stage::AwaitReview => 0,
            Stage::DraftAdvisory => 60,
            Stage::Translate => 60,
            Stage::Publish => 10,
        };
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
#[path = "stage_tests.rs"]
mod tests;
