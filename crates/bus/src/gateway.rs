// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed topic envelopes and dead-letter routing over the raw bus.

use crate::bus::{BusError, Delivery, MessageBus};
use crate::topic::Topic;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use vg_core::{
    AlertMessage, Claim, Clock, DlqEnvelope, ErrorKind, LastError, NotificationMessage, RawItem,
    WorkflowId,
};

/// Outcome of one intake poll.
#[derive(Debug, Clone, PartialEq)]
pub enum Intake {
    /// A decodable message within the attempt cap.
    Fresh { item: RawItem, delivery: Delivery },
    /// Routed to the DLQ (attempt cap exceeded or undecodable) and already
    /// committed. The orchestrator fails the associated workflow when the
    /// source is known.
    Poison { source_id: Option<String>, envelope: DlqEnvelope },
}

/// Typed gateway over a [`MessageBus`].
pub struct BusGateway<B, C: Clock> {
    bus: Arc<B>,
    clock: C,
    dlq_attempt_cap: u32,
}

impl<B: MessageBus, C: Clock> BusGateway<B, C> {
    pub fn new(bus: Arc<B>, clock: C, dlq_attempt_cap: u32) -> Self {
        Self { bus, clock, dlq_attempt_cap }
    }

    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }

    pub fn partitions(&self, topic: Topic) -> u32 {
        self.bus.partitions(topic)
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.clock.epoch_ms() as i64)
            .unwrap_or_else(Utc::now)
    }

    /// Poll the next `raw-items` message for a consumer group.
    ///
    /// Messages beyond the attempt cap and undecodable payloads are routed
    /// to the DLQ and committed here; everything else stays uncommitted
    /// until [`ack`](Self::ack) after the orchestrator checkpoints.
    pub async fn next_raw_item(
        &self,
        group: &str,
        partition: u32,
    ) -> Result<Option<Intake>, BusError> {
        let Some(delivery) = self.bus.poll(group, Topic::RawItems, partition).await? else {
            return Ok(None);
        };

        if delivery.attempts > self.dlq_attempt_cap {
            let source_id = serde_json::from_slice::<RawItem>(&delivery.payload)
                .ok()
                .map(|item| item.source_id);
            let last_error = LastError {
                kind: ErrorKind::Retryable,
                detail: format!("attempts exceeded cap {}", self.dlq_attempt_cap),
            };
            let envelope = self.route_to_dlq(group, &delivery, last_error).await?;
            return Ok(Some(Intake::Poison { source_id, envelope }));
        }

        match serde_json::from_slice::<RawItem>(&delivery.payload) {
            Ok(item) => Ok(Some(Intake::Fresh { item, delivery })),
            Err(e) => {
                let last_error =
                    LastError { kind: ErrorKind::Validation, detail: e.to_string() };
                let envelope = self.route_to_dlq(group, &delivery, last_error).await?;
                Ok(Some(Intake::Poison { source_id: None, envelope }))
            }
        }
    }

    /// Commit a delivery's offset. Call only after the state transition it
    /// produced is durably checkpointed.
    pub async fn ack(&self, group: &str, delivery: &Delivery) -> Result<(), BusError> {
        self.bus.commit(group, delivery.topic, delivery.partition, delivery.offset).await
    }

    async fn route_to_dlq(
        &self,
        group: &str,
        delivery: &Delivery,
        last_error: LastError,
    ) -> Result<DlqEnvelope, BusError> {
        let envelope = DlqEnvelope {
            original_topic: delivery.topic.as_str().to_string(),
            original_partition: delivery.partition,
            original_offset: delivery.offset,
            first_seen_at: DateTime::<Utc>::from_timestamp_millis(
                delivery.first_seen_at_ms as i64,
            )
            .unwrap_or_else(Utc::now),
            last_error,
            attempts: delivery.attempts,
        };
        let key =
            format!("{}:{}:{}", envelope.original_topic, delivery.partition, delivery.offset);
        let payload = serde_json::to_vec(&envelope)
            .map_err(|e| BusError::Serialization(e.to_string()))?;
        tracing::warn!(
            topic = %delivery.topic,
            partition = delivery.partition,
            offset = delivery.offset,
            attempts = delivery.attempts,
            "routing poison message to dlq"
        );
        self.bus.publish(Topic::Dlq, &key, payload).await?;
        self.ack(group, delivery).await?;
        Ok(envelope)
    }

    pub async fn publish_raw_item(&self, item: &RawItem) -> Result<(), BusError> {
        let payload =
            serde_json::to_vec(item).map_err(|e| BusError::Serialization(e.to_string()))?;
        self.bus.publish(Topic::RawItems, &item.source_id, payload).await
    }

    /// Advertise an extracted claim for external consumer pools.
    pub async fn publish_claim(
        &self,
        workflow_id: &WorkflowId,
        claim: &Claim,
    ) -> Result<(), BusError> {
        let payload =
            serde_json::to_vec(claim).map_err(|e| BusError::Serialization(e.to_string()))?;
        self.bus.publish(Topic::Claims, workflow_id.as_str(), payload).await
    }

    pub async fn publish_alert(&self, alert: &AlertMessage) -> Result<(), BusError> {
        let payload =
            serde_json::to_vec(alert).map_err(|e| BusError::Serialization(e.to_string()))?;
        self.bus.publish(Topic::Alerts, alert.workflow_id.as_str(), payload).await
    }

    pub async fn publish_notification(
        &self,
        notification: &NotificationMessage,
    ) -> Result<(), BusError> {
        let payload = serde_json::to_vec(notification)
            .map_err(|e| BusError::Serialization(e.to_string()))?;
        self.bus.publish(Topic::Notifications, &notification.recipient_scope, payload).await
    }

    /// Wall-clock timestamp for outbound envelopes.
    pub fn wire_now(&self) -> DateTime<Utc> {
        self.now()
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
