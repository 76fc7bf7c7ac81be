// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared spec harness: one in-process world per test.

use std::sync::Arc;
use std::time::Duration;

pub use vg_bus::{BusGateway, Intake, MemoryBus, Topic};
pub use vg_core::{
    FakeClock, NotificationEvent, RawItem, ReviewDecision, Stage, VigilConfig, Workflow,
    WorkflowId, WorkflowStatus,
};
pub use vg_engine::{
    fingerprint, load_workflow, recover_orphans, FakeCollaborator, Orchestrator,
    ReviewCoordinator, RoundEnd, CONSUMER_GROUP,
};
pub use vg_store::{keys, MemoryStore, StateStore};

pub struct World {
    pub store: Arc<dyn StateStore>,
    pub bus: Arc<MemoryBus<FakeClock>>,
    pub gateway: Arc<BusGateway<MemoryBus<FakeClock>, FakeClock>>,
    pub fake: Arc<FakeCollaborator>,
    pub orch: Orchestrator<MemoryBus<FakeClock>, FakeClock>,
    pub review: ReviewCoordinator<FakeClock>,
    pub clock: FakeClock,
    pub config: Arc<VigilConfig>,
}

/// A world with millisecond retry backoff; policy shape matches production.
pub fn world() -> World {
    let mut config = VigilConfig::default();
    config.retry_base_ms = 1;
    config.retry_cap_ms = 5;
    world_with(config, "sup-spec")
}

pub fn world_with(config: VigilConfig, owner: &str) -> World {
    let clock = FakeClock::new();
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new(clock.clone()));
    let bus = Arc::new(MemoryBus::new(clock.clone()));
    let config = Arc::new(config);
    let gateway =
        Arc::new(BusGateway::new(bus.clone(), clock.clone(), config.dlq_attempt_cap));
    let fake = FakeCollaborator::new();
    let orch = Orchestrator::new(
        store.clone(),
        gateway.clone(),
        Arc::new(fake.collaborators()),
        config.clone(),
        clock.clone(),
        owner,
    );
    let review = ReviewCoordinator::new(store.clone(), config.clone(), clock.clone());
    World { store, bus, gateway, fake, orch, review, clock, config }
}

/// A second orchestrator process sharing this world's bus and store.
pub fn second_owner(world: &World, owner: &str) -> Orchestrator<MemoryBus<FakeClock>, FakeClock> {
    Orchestrator::new(
        world.store.clone(),
        world.gateway.clone(),
        Arc::new(world.fake.collaborators()),
        world.config.clone(),
        world.clock.clone(),
        owner,
    )
}

pub fn raw_item(source_id: &str, text: &str) -> RawItem {
    RawItem {
        source_id: source_id.into(),
        source: "spec-feed".into(),
        payload: serde_json::json!({ "text": text }),
        ingested_at: chrono::Utc::now(),
    }
}

pub fn workflow_id(source_id: &str) -> WorkflowId {
    WorkflowId::from_fingerprint(&fingerprint(source_id))
}

impl World {
    /// Publish and return the pending intake for an item.
    pub async fn deliver(&self, item: &RawItem) -> Intake {
        self.gateway.publish_raw_item(item).await.unwrap();
        self.next_intake().await.expect("message should be pending")
    }

    pub async fn next_intake(&self) -> Option<Intake> {
        for partition in 0..self.gateway.partitions(Topic::RawItems) {
            if let Some(intake) =
                self.gateway.next_raw_item(CONSUMER_GROUP, partition).await.unwrap()
            {
                return Some(intake);
            }
        }
        None
    }

    /// Deliver and fully process one item.
    pub async fn process(&self, item: &RawItem) -> RoundEnd {
        let intake = self.deliver(item).await;
        self.orch.process_intake(intake).await.unwrap()
    }

    pub async fn workflow(&self, source_id: &str) -> Workflow {
        load_workflow(&self.store, &workflow_id(source_id))
            .await
            .unwrap()
            .expect("workflow should exist")
    }

    pub fn alerts(&self) -> Vec<vg_core::AlertMessage> {
        self.bus
            .drain_payloads(Topic::Alerts)
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect()
    }

    pub fn notifications(&self) -> Vec<vg_core::NotificationMessage> {
        self.bus
            .drain_payloads(Topic::Notifications)
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect()
    }

    pub fn advance(&self, duration: Duration) {
        self.clock.advance(duration);
    }
}
