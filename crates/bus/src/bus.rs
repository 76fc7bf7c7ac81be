// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The broker contract.

use crate::topic::Topic;
use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by the bus.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Broker unreachable; callers back off, no state mutation.
    #[error("bus unavailable: {0}")]
    Unavailable(String),
    /// Payload cannot be decoded; non-retryable, routes to the DLQ.
    #[error("serialization: {0}")]
    Serialization(String),
    /// Credentials rejected; fatal at the supervisor.
    #[error("auth: {0}")]
    Auth(String),
}

/// One delivered message.
///
/// `attempts` counts deliveries to this consumer group, including this
/// one. It drives dead-letter routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: Topic,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
    pub attempts: u32,
    pub first_seen_at_ms: u64,
}

/// Partitioned, at-least-once durable log.
///
/// Guarantees:
/// - per-key ordering within a partition (keys hash to partitions stably),
/// - a message stays visible to its group until committed; polling again
///   without a commit redelivers it with `attempts` incremented,
/// - commits are per (group, topic, partition) offsets; committing offset
///   `n` acknowledges everything at or below `n`.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: Topic, key: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Next uncommitted message for the group on one partition, if any.
    async fn poll(
        &self,
        group: &str,
        topic: Topic,
        partition: u32,
    ) -> Result<Option<Delivery>, BusError>;

    async fn commit(
        &self,
        group: &str,
        topic: Topic,
        partition: u32,
        offset: u64,
    ) -> Result<(), BusError>;

    fn partitions(&self, topic: Topic) -> u32;
}
