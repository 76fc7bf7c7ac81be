// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The collaborator seam: every pipeline stage is an opaque single-method
//! predicate. ML models, fact-check services, and translators live behind
//! this trait; the node runtime owns timeout and retry around them.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use vg_core::{Claim, NodeError, Stage, WorkflowId};

/// Input handed to one stage attempt.
///
/// Built entirely from persisted workflow state, so an attempt after a
/// crash sees exactly what the original attempt saw.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub workflow_id: WorkflowId,
    pub stage: Stage,
    /// 1-based attempt counter; stages use it to keep side effects
    /// idempotent (write behind CAS or be side-effect-free).
    pub attempt: u32,
    /// Raw item payload.
    pub payload: serde_json::Value,
    /// Stage outputs accumulated so far, keyed by result key.
    pub results: BTreeMap<String, serde_json::Value>,
    /// Set for per-claim stages only.
    pub claim: Option<Claim>,
}

/// A pipeline stage implementation.
///
/// Must tolerate re-invocation with the same input after a crash.
#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn apply(&self, input: StageInput) -> Result<serde_json::Value, NodeError>;
}

/// Registry binding each collaborator stage to its implementation.
#[derive(Default, Clone)]
pub struct Collaborators {
    inner: HashMap<Stage, Arc<dyn Collaborator>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: Stage, collaborator: Arc<dyn Collaborator>) -> Self {
        self.inner.insert(stage, collaborator);
        self
    }

    pub fn get(&self, stage: Stage) -> Option<&Arc<dyn Collaborator>> {
        self.inner.get(&stage)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeCollaborator;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use vg_core::ClaimId;

    /// Scriptable collaborator covering every stage.
    ///
    /// Unscripted stages produce deterministic canned outputs; scripted
    /// outcomes are consumed per stage in FIFO order, so transient-failure
    /// sequences ("fail, fail, succeed") are one-liners in tests.
    pub struct FakeCollaborator {
        scripts: Mutex<HashMap<Stage, VecDeque<Result<serde_json::Value, NodeError>>>>,
        risk_score: Mutex<f64>,
        claim_texts: Mutex<Vec<String>>,
        calls: Mutex<Vec<(Stage, u32)>>,
    }

    impl Default for FakeCollaborator {
        fn default() -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                risk_score: Mutex::new(0.10),
                claim_texts: Mutex::new(vec!["water level is rising".to_string()]),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl FakeCollaborator {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Queue one outcome for a stage's next invocation.
        pub fn script(&self, stage: Stage, outcome: Result<serde_json::Value, NodeError>) {
            self.scripts.lock().entry(stage).or_default().push_back(outcome);
        }

        pub fn set_risk(&self, score: f64) {
            *self.risk_score.lock() = score;
        }

        pub fn set_claim_texts(&self, texts: Vec<String>) {
            *self.claim_texts.lock() = texts;
        }

        /// Every (stage, attempt) invocation, in call order.
        pub fn calls(&self) -> Vec<(Stage, u32)> {
            self.calls.lock().clone()
        }

        /// Registry binding this fake to every collaborator stage.
        pub fn collaborators(self: &Arc<Self>) -> Collaborators {
            let mut registry = Collaborators::new();
            for stage in [
                Stage::Normalize,
                Stage::EntityExtract,
                Stage::ClaimExtract,
                Stage::TopicAssign,
                Stage::EvidenceRetrieve,
                Stage::VeracityAssess,
                Stage::RiskScore,
                Stage::DraftAdvisory,
                Stage::Translate,
                Stage::Publish,
            ] {
                registry = registry.with(stage, self.clone() as Arc<dyn Collaborator>);
            }
            registry
        }

        fn canned(&self, input: &StageInput) -> serde_json::Value {
            match input.stage {
                Stage::Normalize => {
                    let text = input
                        .payload
                        .get("text")
                        .and_then(|t| t.as_str())
                        .unwrap_or_default();
                    serde_json::json!({"text": text.trim().to_lowercase()})
                }
                Stage::EntityExtract => serde_json::json!({"entities": []}),
                Stage::ClaimExtract => {
                    let claims: Vec<Claim> = self
                        .claim_texts
                        .lock()
                        .iter()
                        .map(|text| Claim {
                            claim_id: ClaimId::new(),
                            text: text.clone(),
                            span: (0, text.len()),
                        })
                        .collect();
                    serde_json::json!({"claims": claims})
                }
                Stage::TopicAssign => serde_json::json!({"topic": "general"}),
                Stage::EvidenceRetrieve => serde_json::json!({"evidence": []}),
                Stage::VeracityAssess => serde_json::json!({"verdict": "unverified"}),
                Stage::RiskScore => serde_json::json!({"risk_score": *self.risk_score.lock()}),
                Stage::DraftAdvisory => serde_json::json!({"advisory": "stay clear of the area"}),
                Stage::Translate => {
                    serde_json::json!({"translations": {"hi": "advisory-hi", "mr": "advisory-mr"}})
                }
                Stage::Publish => serde_json::json!({"published": true}),
                Stage::Merge | Stage::AwaitReview => serde_json::Value::Null,
            }
        }
    }

    #[async_trait]
    impl Collaborator for FakeCollaborator {
        async fn apply(&self, input: StageInput) -> Result<serde_json::Value, NodeError> {
            self.calls.lock().push((input.stage, input.attempt));
            if let Some(outcome) =
                self.scripts.lock().get_mut(&input.stage).and_then(VecDeque::pop_front)
            {
                return outcome;
            }
            Ok(self.canned(&input))
        }
    }
}
