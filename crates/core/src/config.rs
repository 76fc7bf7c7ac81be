// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime configuration, loaded from TOML with serde defaults.

use crate::stage::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Per-node wall-clock overrides, keyed by stage; stages without an
/// override use [`Stage::default_timeout`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeTimeouts(pub BTreeMap<Stage, u64>);

impl NodeTimeouts {
    pub fn for_stage(&self, stage: Stage) -> Duration {
        self.0
            .get(&stage)
            .map(|ms| Duration::from_millis(*ms))
            .unwrap_or_else(|| stage.default_timeout())
    }
}

/// All recognized options with their documented defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VigilConfig {
    /// risk ≥ this parks the workflow for review
    pub review_threshold: f64,
    /// max concurrent per-claim sub-pipelines
    pub claim_parallelism: usize,
    /// per-node wall-clock limits (ms)
    pub node_timeouts: NodeTimeouts,
    /// retries per node on retryable errors
    pub retry_max_attempts: u32,
    /// backoff base (ms); doubles per attempt
    pub retry_base_ms: u64,
    /// backoff cap (ms)
    pub retry_cap_ms: u64,
    /// message attempts before DLQ routing
    pub dlq_attempt_cap: u32,
    /// retention of terminal workflow state (ms)
    pub workflow_ttl_ms: u64,
    /// workflow-wide processing deadline (ms), review pauses excluded
    pub workflow_deadline_ms: u64,
    /// operator claim lease duration (ms)
    pub review_lease_ms: u64,
    /// review decision deadline before reminders start (ms)
    pub review_deadline_ms: u64,
    /// per-subscriber observer buffer
    pub observer_queue_size: usize,
    /// observer heartbeat interval (ms); two misses close the connection
    pub heartbeat_ms: u64,
    /// graceful drain window on shutdown (ms)
    pub shutdown_grace_ms: u64,
    /// owner-lease duration (ms); renewed while driving
    pub owner_lease_ms: u64,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            review_threshold: 0.7,
            claim_parallelism: 4,
            node_timeouts: NodeTimeouts::default(),
            retry_max_attempts: 3,
            retry_base_ms: 1_000,
            retry_cap_ms: 10_000,
            dlq_attempt_cap: 5,
            workflow_ttl_ms: 7 * 24 * 60 * 60 * 1_000,
            workflow_deadline_ms: 30 * 60 * 1_000,
            review_lease_ms: 30 * 60 * 1_000,
            review_deadline_ms: 24 * 60 * 60 * 1_000,
            observer_queue_size: 100,
            heartbeat_ms: 30_000,
            shutdown_grace_ms: 30_000,
            owner_lease_ms: 60_000,
        }
    }
}

impl VigilConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.review_threshold) {
            return Err(ConfigError::Invalid(format!(
                "review_threshold must be in [0,1], got {}",
                self.review_threshold
            )));
        }
        if self.claim_parallelism == 0 {
            return Err(ConfigError::Invalid("claim_parallelism must be ≥ 1".into()));
        }
        if self.retry_base_ms == 0 || self.retry_cap_ms < self.retry_base_ms {
            return Err(ConfigError::Invalid("retry backoff window is empty".into()));
        }
        Ok(())
    }

    pub fn node_timeout(&self, stage: Stage) -> Duration {
        self.node_timeouts.for_stage(stage)
    }

    pub fn workflow_ttl(&self) -> Duration {
        Duration::from_millis(self.workflow_ttl_ms)
    }

    pub fn workflow_deadline(&self) -> Duration {
        Duration::from_millis(self.workflow_deadline_ms)
    }

    pub fn review_lease(&self) -> Duration {
        Duration::from_millis(self.review_lease_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn owner_lease(&self) -> Duration {
        Duration::from_millis(self.owner_lease_ms)
    }

    /// Interval for extending in-flight state TTLs: comfortably below the
    /// TTL itself so a healthy owner never lets state lapse.
    pub fn ttl_extension_interval(&self) -> Duration {
        Duration::from_millis(self.workflow_ttl_ms / 3)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
