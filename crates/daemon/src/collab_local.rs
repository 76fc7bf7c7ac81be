// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic local stage implementations.
//!
//! Deployments bind real model and service collaborators; this set keeps
//! `vgd` runnable end-to-end on one machine with no external dependencies.
//! Every function is pure on its input, so crash re-runs are safe.

use async_trait::async_trait;
use std::sync::Arc;
use vg_core::{Claim, ClaimId, NodeError, Stage};
use vg_engine::{Collaborator, Collaborators, StageInput};

const RISK_KEYWORDS: [&str; 8] =
    ["explosion", "fire", "flood", "riot", "collapse", "outbreak", "attack", "stampede"];

struct LocalStages;

impl LocalStages {
    fn text(input: &StageInput) -> Result<String, NodeError> {
        // Downstream stages read the normalized text; normalize itself
        // reads the raw payload.
        if let Some(normalized) = input.results.get("normalize") {
            if let Some(text) = normalized.get("text").and_then(|t| t.as_str()) {
                return Ok(text.to_string());
            }
        }
        input
            .payload
            .get("text")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| NodeError::validation("payload has no text field"))
    }

    fn risk_of(text: &str) -> f64 {
        let hits = RISK_KEYWORDS.iter().filter(|k| text.contains(**k)).count();
        (hits as f64 * 0.35).min(1.0)
    }
}

#[async_trait]
impl Collaborator for LocalStages {
    async fn apply(&self, input: StageInput) -> Result<serde_json::Value, NodeError> {
        match input.stage {
            Stage::Normalize => {
                let raw = input
                    .payload
                    .get("text")
                    .and_then(|t| t.as_str())
                    .ok_or_else(|| NodeError::validation("payload has no text field"))?;
                Ok(serde_json::json!({
                    "text": raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase(),
                }))
            }
            Stage::EntityExtract => {
                let raw = input
                    .payload
                    .get("text")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default();
                let entities: Vec<&str> = raw
                    .split_whitespace()
                    .filter(|w| w.chars().next().is_some_and(char::is_uppercase))
                    .collect();
                Ok(serde_json::json!({ "entities": entities }))
            }
            Stage::ClaimExtract => {
                let text = Self::text(&input)?;
                let mut cursor = 0usize;
                let mut claims = Vec::new();
                for sentence in text.split('.') {
                    let trimmed = sentence.trim();
                    if !trimmed.is_empty() {
                        let start = cursor + (sentence.len() - sentence.trim_start().len());
                        claims.push(Claim {
                            claim_id: ClaimId::new(),
                            text: trimmed.to_string(),
                            span: (start, start + trimmed.len()),
                        });
                    }
                    cursor += sentence.len() + 1;
                }
                Ok(serde_json::json!({ "claims": claims }))
            }
            Stage::TopicAssign => {
                let claim = input.claim.as_ref().map(|c| c.text.as_str()).unwrap_or_default();
                let topic = RISK_KEYWORDS
                    .iter()
                    .find(|k| claim.contains(**k))
                    .copied()
                    .unwrap_or("general");
                Ok(serde_json::json!({ "topic": topic }))
            }
            Stage::EvidenceRetrieve => Ok(serde_json::json!({ "evidence": [] })),
            Stage::VeracityAssess => {
                let claim = input.claim.as_ref().map(|c| c.text.as_str()).unwrap_or_default();
                let verdict =
                    if claim.chars().any(|c| c.is_ascii_digit()) { "checkable" } else { "unverified" };
                Ok(serde_json::json!({ "verdict": verdict }))
            }
            Stage::RiskScore => {
                let text = Self::text(&input)?;
                Ok(serde_json::json!({ "risk_score": Self::risk_of(&text) }))
            }
            Stage::DraftAdvisory => {
                let text = Self::text(&input)?;
                Ok(serde_json::json!({
                    "advisory": format!("Verified update: {text}"),
                }))
            }
            Stage::Translate => {
                let advisory = input
                    .results
                    .get("draft")
                    .and_then(|d| d.get("advisory"))
                    .and_then(|a| a.as_str())
                    .unwrap_or_default();
                Ok(serde_json::json!({ "translations": { "en": advisory } }))
            }
            Stage::Publish => Ok(serde_json::json!({ "published": true, "channel": "local" })),
            Stage::Merge | Stage::AwaitReview => Ok(serde_json::Value::Null),
        }
    }
}

/// Registry binding every collaborator stage to the local implementation.
pub fn local_collaborators() -> Collaborators {
    let stages: Arc<dyn Collaborator> = Arc::new(LocalStages);
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
        registry = registry.with(stage, stages.clone());
    }
    registry
}

#[cfg(test)]
#[path = "collab_local_tests.rs"]
mod tests;
