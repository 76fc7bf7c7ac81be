// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The state-store contract.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors surfaced by a state store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("version conflict on {key}")]
    VersionConflict { key: String },
    #[error("serialization: {0}")]
    Serialization(String),
}

/// A value plus the version that guards its next write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub version: u64,
    pub data: Vec<u8>,
}

/// Key-value store with versioned CAS, TTL, pub/sub channels, and a
/// time-ordered pending-review index.
///
/// Every workflow status transition goes through [`cas`](Self::cas);
/// `expected_version == 0` means create-if-absent.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError>;

    /// Unconditional write. Returns the new version.
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<u64, StoreError>;

    /// Compare-and-swap on version. Returns the new version, or
    /// [`StoreError::VersionConflict`] when the key moved underneath the
    /// caller (including create races when `expected_version == 0`).
    async fn cas(
        &self,
        key: &str,
        expected_version: u64,
        data: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<u64, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Reset a key's TTL without touching value or version. Missing keys
    /// are a no-op.
    async fn extend_ttl(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// All live entries under a key prefix, in key order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Versioned)>, StoreError>;

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), StoreError>;

    /// Subscribe to a pub/sub channel. Messages published before the call
    /// are not replayed.
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>>;

    /// Insert into the pending-review index, ordered by request time.
    async fn review_push(&self, workflow_id: &str, requested_at_ms: u64)
        -> Result<(), StoreError>;

    /// A page of the pending-review index in request-time order:
    /// `(workflow_id, requested_at_ms)`.
    async fn review_range(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<(String, u64)>, StoreError>;

    async fn review_remove(&self, workflow_id: &str) -> Result<(), StoreError>;
}

/// Serialize a value for storage.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Deserialize a stored blob.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(data).map_err(|e| StoreError::Serialization(e.to_string()))
}
