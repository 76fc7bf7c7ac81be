// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process lifecycle: partition workers, decision-driven resumption,
//! maintenance loops, graceful drain.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use vg_bus::{BusGateway, MessageBus, Topic};
use vg_core::{Clock, VigilConfig, WorkflowId, WorkflowStatus};
use vg_engine::{
    recover_orphans, Collaborators, EngineError, Orchestrator, ReviewCoordinator,
};
use vg_observer::{run_forwarder, ObserverPlane};
use vg_store::{decode, keys, StateStore};

/// Owns every long-running task of one orchestrator process.
pub struct Supervisor<B: MessageBus + 'static, C: Clock + 'static> {
    store: Arc<dyn StateStore>,
    gateway: Arc<BusGateway<B, C>>,
    orchestrator: Arc<Orchestrator<B, C>>,
    review: Arc<ReviewCoordinator<C>>,
    plane: Arc<ObserverPlane<C>>,
    config: Arc<VigilConfig>,
    clock: C,
    owner: String,
}

impl<B: MessageBus + 'static, C: Clock + 'static> Supervisor<B, C> {
    pub fn new(
        store: Arc<dyn StateStore>,
        bus: Arc<B>,
        collabs: Arc<Collaborators>,
        config: Arc<VigilConfig>,
        clock: C,
    ) -> Self {
        let owner = format!("sup-{}", nanoid::nanoid!(8));
        let gateway =
            Arc::new(BusGateway::new(bus, clock.clone(), config.dlq_attempt_cap));
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            gateway.clone(),
            collabs,
            config.clone(),
            clock.clone(),
            owner.clone(),
        ));
        let review =
            Arc::new(ReviewCoordinator::new(store.clone(), config.clone(), clock.clone()));
        let plane = Arc::new(ObserverPlane::new(&config, clock.clone()));
        Self { store, gateway, orchestrator, review, plane, config, clock, owner }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator<B, C>> {
        &self.orchestrator
    }

    pub fn review(&self) -> &Arc<ReviewCoordinator<C>> {
        &self.review
    }

    pub fn plane(&self) -> &Arc<ObserverPlane<C>> {
        &self.plane
    }

    /// Run until `shutdown` fires, then drain within the grace window.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), EngineError> {
        let adopted = recover_orphans(&self.orchestrator).await?;
        if adopted > 0 {
            tracing::info!(adopted, "recovery pass adopted orphaned workflows");
        }

        let workers = CancellationToken::new();
        let mut tasks = JoinSet::new();

        tasks.spawn(run_forwarder(
            self.store.clone(),
            self.plane.clone(),
            workers.child_token(),
        ));

        for partition in 0..self.gateway.partitions(Topic::RawItems) {
            let orchestrator = self.orchestrator.clone();
            let cancel = workers.child_token();
            tasks.spawn(async move {
                orchestrator.run_partition(partition, cancel).await;
            });
        }

        {
            let store = self.store.clone();
            let orchestrator = self.orchestrator.clone();
            let cancel = workers.child_token();
            tasks.spawn(async move {
                decision_listener(store, orchestrator, cancel).await;
            });
        }

        {
            let cancel = workers.child_token();
            let maintenance = self.maintenance_handles();
            tasks.spawn(async move {
                maintenance.run(cancel).await;
            });
        }

        shutdown.cancelled().await;
        tracing::info!(owner = %self.owner, "shutdown requested, draining in-flight work");
        workers.cancel();

        let grace = self.config.shutdown_grace();
        if tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_err()
        {
            tracing::warn!("drain window elapsed, aborting remaining tasks");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        self.release_owned_leases().await?;
        tracing::info!(owner = %self.owner, "supervisor stopped");
        Ok(())
    }

    /// Drop every lease this process still holds so another supervisor can
    /// pick the workflows up immediately.
    async fn release_owned_leases(&self) -> Result<(), EngineError> {
        for (key, versioned) in self.store.scan_prefix(keys::WF_OWNER_PREFIX).await? {
            if versioned.data == self.owner.as_bytes() {
                self.store.delete(&key).await?;
            }
        }
        Ok(())
    }

    fn maintenance_handles(&self) -> Maintenance<B, C> {
        Maintenance {
            store: self.store.clone(),
            gateway: self.gateway.clone(),
            review: self.review.clone(),
            plane: self.plane.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
        }
    }
}

/// Resume parked workflows when their review decision lands.
async fn decision_listener<B: MessageBus + 'static, C: Clock + 'static>(
    store: Arc<dyn StateStore>,
    orchestrator: Arc<Orchestrator<B, C>>,
    cancel: CancellationToken,
) {
    let mut rx = store.subscribe(keys::REVIEW_DECIDED_CHANNEL);
    let mut resumes: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(payload) => {
                    let Ok(workflow_id) = decode::<WorkflowId>(&payload) else {
                        tracing::warn!("undecodable decision signal");
                        continue;
                    };
                    let orchestrator = orchestrator.clone();
                    resumes.spawn(async move {
                        if let Err(e) = orchestrator.resume(&workflow_id).await {
                            tracing::error!(workflow_id = %workflow_id, error = %e, "resume failed");
                        }
                    });
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    // Missed signals are caught by the next recovery pass.
                    tracing::warn!(skipped, "decision listener lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    while resumes.join_next().await.is_some() {}
}

/// Periodic housekeeping: observer pruning, review reminders, and TTL
/// extension for in-flight state.
struct Maintenance<B: MessageBus, C: Clock> {
    store: Arc<dyn StateStore>,
    gateway: Arc<BusGateway<B, C>>,
    review: Arc<ReviewCoordinator<C>>,
    plane: Arc<ObserverPlane<C>>,
    config: Arc<VigilConfig>,
    clock: C,
}

impl<B: MessageBus, C: Clock> Maintenance<B, C> {
    async fn run(&self, cancel: CancellationToken) {
        let tick = Duration::from_millis(self.config.heartbeat_ms);
        let mut last_ttl_extension = self.clock.epoch_ms();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(tick) => {}
            }

            self.plane.prune_stale();

            match self.review.overdue_reminders().await {
                Ok(reminders) => {
                    for reminder in reminders {
                        if let Err(e) = self.gateway.publish_alert(&reminder).await {
                            tracing::warn!(error = %e, "reminder publish failed");
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "reminder scan failed"),
            }

            let now = self.clock.epoch_ms();
            let interval = self.config.ttl_extension_interval();
            if now.saturating_sub(last_ttl_extension) >= interval.as_millis() as u64 {
                last_ttl_extension = now;
                if let Err(e) = self.extend_inflight_ttls().await {
                    tracing::warn!(error = %e, "ttl extension failed");
                }
            }
        }
    }

    /// Keep in-flight state alive indefinitely by refreshing its TTL well
    /// inside the retention window.
    async fn extend_inflight_ttls(&self) -> Result<(), EngineError> {
        let ttl = self.config.workflow_ttl();
        for (key, versioned) in self.store.scan_prefix(keys::WF_STATE_PREFIX).await? {
            let Ok(workflow) = decode::<vg_core::Workflow>(&versioned.data) else {
                continue;
            };
            if matches!(
                workflow.status,
                WorkflowStatus::Pending
                    | WorkflowStatus::Running
                    | WorkflowStatus::AwaitingReview
                    | WorkflowStatus::Resuming
            ) {
                self.store.extend_ttl(&key, ttl).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
