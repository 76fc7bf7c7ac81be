// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory state store.

use crate::store::{StateStore, StoreError, Versioned};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::broadcast;
use vg_core::Clock;

const CHANNEL_CAPACITY: usize = 256;

struct Entry {
    version: u64,
    data: Vec<u8>,
    expires_at_ms: Option<u64>,
}

impl Entry {
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|at| now_ms >= at)
    }
}

/// Process-local [`StateStore`] with lazy TTL expiry.
///
/// Expired entries are invisible to readers immediately and reaped by
/// [`sweep`](Self::sweep); the supervisor calls sweep on its periodic tick.
pub struct MemoryStore<C: Clock> {
    entries: RwLock<HashMap<String, Entry>>,
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    /// (requested_at_ms, workflow_id) → () for time-ordered range reads.
    review: Mutex<BTreeMap<(u64, String), ()>>,
    clock: C,
}

impl<C: Clock> MemoryStore<C> {
    pub fn new(clock: C) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            review: Mutex::new(BTreeMap::new()),
            clock,
        }
    }

    /// Drop every expired entry. Returns how many were reaped.
    pub fn sweep(&self) -> usize {
        let now_ms = self.clock.epoch_ms();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now_ms));
        before - entries.len()
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<u64> {
        ttl.map(|ttl| self.clock.epoch_ms() + ttl.as_millis() as u64)
    }
}

#[async_trait]
impl<C: Clock> StateStore for MemoryStore<C> {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        let now_ms = self.clock.epoch_ms();
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(now_ms))
            .map(|entry| Versioned { version: entry.version, data: entry.data.clone() }))
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<u64, StoreError> {
        let expires_at_ms = self.expiry(ttl);
        let now_ms = self.clock.epoch_ms();
        let mut entries = self.entries.write();
        let version = match entries.get(key) {
            Some(entry) if !entry.is_expired(now_ms) => entry.version + 1,
            _ => 1,
        };
        entries.insert(key.to_string(), Entry { version, data, expires_at_ms });
        Ok(version)
    }

    async fn cas(
        &self,
        key: &str,
        expected_version: u64,
        data: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<u64, StoreError> {
        let expires_at_ms = self.expiry(ttl);
        let now_ms = self.clock.epoch_ms();
        let mut entries = self.entries.write();
        let current = entries.get(key).filter(|entry| !entry.is_expired(now_ms));
        let current_version = current.map(|entry| entry.version).unwrap_or(0);
        if current_version != expected_version {
            return Err(StoreError::VersionConflict { key: key.to_string() });
        }
        let version = current_version + 1;
        entries.insert(key.to_string(), Entry { version, data, expires_at_ms });
        Ok(version)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn extend_ttl(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at_ms = self.clock.epoch_ms() + ttl.as_millis() as u64;
        if let Some(entry) = self.entries.write().get_mut(key) {
            entry.expires_at_ms = Some(expires_at_ms);
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Versioned)>, StoreError> {
        let now_ms = self.clock.epoch_ms();
        let entries = self.entries.read();
        let mut matches: Vec<(String, Versioned)> = entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired(now_ms))
            .map(|(key, entry)| {
                (key.clone(), Versioned { version: entry.version, data: entry.data.clone() })
            })
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matches)
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), StoreError> {
        // A send with no subscribers is fine; broadcasts are best-effort.
        let _ = self.sender_for(channel).send(payload);
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>> {
        self.sender_for(channel).subscribe()
    }

    async fn review_push(
        &self,
        workflow_id: &str,
        requested_at_ms: u64,
    ) -> Result<(), StoreError> {
        self.review.lock().insert((requested_at_ms, workflow_id.to_string()), ());
        Ok(())
    }

    async fn review_range(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<(String, u64)>, StoreError> {
        Ok(self
            .review
            .lock()
            .keys()
            .skip(offset)
            .take(limit)
            .map(|(at_ms, id)| (id.clone(), *at_ms))
            .collect())
    }

    async fn review_remove(&self, workflow_id: &str) -> Result<(), StoreError> {
        self.review.lock().retain(|(_, id), _| id != workflow_id);
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
