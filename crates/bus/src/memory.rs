// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process partitioned log.

use crate::bus::{BusError, Delivery, MessageBus};
use crate::topic::Topic;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use vg_core::Clock;

struct Record {
    key: String,
    payload: Vec<u8>,
    first_seen_at_ms: u64,
}

#[derive(Default)]
struct GroupCursor {
    /// Offset of the next message to hand out.
    next: u64,
    /// Redelivery counts for the currently uncommitted offset.
    attempts: HashMap<u64, u32>,
}

/// In-memory [`MessageBus`] with the broker contract's semantics.
pub struct MemoryBus<C: Clock> {
    /// (topic, partition) → append-only log.
    logs: Mutex<HashMap<(Topic, u32), Vec<Record>>>,
    /// (group, topic, partition) → cursor.
    cursors: Mutex<HashMap<(String, Topic, u32), GroupCursor>>,
    clock: C,
}

impl<C: Clock> MemoryBus<C> {
    pub fn new(clock: C) -> Self {
        Self { logs: Mutex::new(HashMap::new()), cursors: Mutex::new(HashMap::new()), clock }
    }

    fn partition_for(&self, topic: Topic, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions(topic) as u64) as u32
    }

    /// Total records appended to one partition (test visibility).
    pub fn log_len(&self, topic: Topic, partition: u32) -> usize {
        self.logs.lock().get(&(topic, partition)).map(Vec::len).unwrap_or(0)
    }

    /// All payloads on a topic across partitions, in append order per
    /// partition (test visibility).
    pub fn drain_payloads(&self, topic: Topic) -> Vec<Vec<u8>> {
        let logs = self.logs.lock();
        let mut out = Vec::new();
        for partition in 0..self.partitions(topic) {
            if let Some(log) = logs.get(&(topic, partition)) {
                out.extend(log.iter().map(|r| r.payload.clone()));
            }
        }
        out
    }
}

#[async_trait]
impl<C: Clock> MessageBus for MemoryBus<C> {
    async fn publish(&self, topic: Topic, key: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let partition = self.partition_for(topic, key);
        let mut logs = self.logs.lock();
        logs.entry((topic, partition)).or_default().push(Record {
            key: key.to_string(),
            payload,
            first_seen_at_ms: self.clock.epoch_ms(),
        });
        Ok(())
    }

    async fn poll(
        &self,
        group: &str,
        topic: Topic,
        partition: u32,
    ) -> Result<Option<Delivery>, BusError> {
        let logs = self.logs.lock();
        let Some(log) = logs.get(&(topic, partition)) else {
            return Ok(None);
        };
        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry((group.to_string(), topic, partition)).or_default();
        let offset = cursor.next;
        let Some(record) = log.get(offset as usize) else {
            return Ok(None);
        };
        let attempts = cursor.attempts.entry(offset).or_insert(0);
        *attempts += 1;
        Ok(Some(Delivery {
            topic,
            partition,
            offset,
            key: record.key.clone(),
            payload: record.payload.clone(),
            attempts: *attempts,
            first_seen_at_ms: record.first_seen_at_ms,
        }))
    }

    async fn commit(
        &self,
        group: &str,
        topic: Topic,
        partition: u32,
        offset: u64,
    ) -> Result<(), BusError> {
        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry((group.to_string(), topic, partition)).or_default();
        if offset >= cursor.next {
            cursor.next = offset + 1;
            cursor.attempts.retain(|o, _| *o > offset);
        }
        Ok(())
    }

    fn partitions(&self, topic: Topic) -> u32 {
        topic.default_partitions()
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
