// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry backoff: exponential with a cap and ±20% jitter.
//!
//! Jitter is derived from a hash of (seed, attempt) rather than an RNG, so
//! delays are reproducible in tests while still de-correlating workflows.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use vg_core::VigilConfig;

/// Delay before re-attempting a node after failed attempt `attempt` (1-based).
pub fn backoff_delay(config: &VigilConfig, attempt: u32, seed: &str) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let exp_ms = config
        .retry_base_ms
        .saturating_mul(1u64 << shift)
        .min(config.retry_cap_ms);

    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    attempt.hash(&mut hasher);
    // Factor in [0.8, 1.2], in permille steps.
    let jitter_permille = 800 + hasher.finish() % 401;
    Duration::from_millis(exp_ms * jitter_permille / 1000)
}
