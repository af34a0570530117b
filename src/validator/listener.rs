//! Live and recovered traffic checks
//!
//! The listener watches measurements on the measurement topic and broker
//! confirmations on the system topic. When a recovery orchestrator is
//! attached, recovered measurements are checked by their own monitor.

use crate::protocol::{self, Confirmation, Measurement, MessageMetadata, SystemMessage};
use crate::recovery::RecoveryOrchestrator;
use crate::transport::{PubSub, Subscription, SubscriptionId, Topics};
use crate::validator::error::ValidatorResult;
use crate::validator::gap_monitor::GapMonitor;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub(crate) struct Monitors {
    pub measurements: GapMonitor,
    pub confirmations: GapMonitor,
    pub recovered: GapMonitor,
    log_every: u64,
}

impl Monitors {
    fn new(log_every: u64) -> Self {
        Self {
            measurements: GapMonitor::new("measurement"),
            confirmations: GapMonitor::new("confirmation"),
            recovered: GapMonitor::new("recovered"),
            log_every,
        }
    }

    fn should_log(&self, seq_num: u64) -> bool {
        self.log_every > 0 && seq_num % self.log_every == 0
    }

    fn on_measurement(&self, measurement: &Measurement, metadata: &MessageMetadata) {
        self.measurements
            .observe(&metadata.publisher_id, measurement.seq_num);
        if self.should_log(measurement.seq_num) {
            info!(
                publisher_id = %metadata.publisher_id,
                seq_num = measurement.seq_num,
                "Measurement"
            );
        }
    }

    fn on_recovered(&self, measurement: &Measurement, metadata: &MessageMetadata) {
        self.recovered
            .observe(&metadata.publisher_id, measurement.seq_num);
    }

    fn on_confirmation(&self, confirmation: &Confirmation, metadata: &MessageMetadata) {
        self.confirmations
            .observe(&metadata.publisher_id, confirmation.seq_num);
        if self.should_log(confirmation.seq_num) {
            info!(
                publisher_id = %metadata.publisher_id,
                seq_num = confirmation.seq_num,
                "Confirmation"
            );
        }
    }
}

struct Running {
    subscriptions: Vec<SubscriptionId>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Listener {
    bus: Arc<dyn PubSub>,
    topics: Topics,
    monitors: Arc<Monitors>,
    recovery: Option<Arc<RecoveryOrchestrator>>,
    running: Mutex<Option<Running>>,
}

impl Listener {
    pub fn new(
        bus: Arc<dyn PubSub>,
        topics: Topics,
        log_every: u64,
        recovery: Option<Arc<RecoveryOrchestrator>>,
    ) -> Self {
        Self {
            bus,
            topics,
            monitors: Arc::new(Monitors::new(log_every)),
            recovery,
            running: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> ValidatorResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let system = self.bus.subscribe(&self.topics.system).await?;
        let sensor = match self.bus.subscribe(&self.topics.measurement).await {
            Ok(sub) => sub,
            Err(e) => {
                self.release(system.id).await;
                return Err(e.into());
            }
        };

        let subscriptions = vec![system.id, sensor.id];
        let tasks = vec![
            self.spawn_listener(system, |monitors, message, metadata| {
                if let SystemMessage::Confirmation(c) = message {
                    monitors.on_confirmation(&c, metadata);
                }
            }),
            self.spawn_listener(sensor, |monitors, message, metadata| {
                if let SystemMessage::Measurement(m) = message {
                    monitors.on_measurement(&m, metadata);
                }
            }),
        ];

        if let Some(recovery) = &self.recovery {
            let monitors = self.monitors.clone();
            let started = recovery
                .start(move |measurement, metadata| monitors.on_recovered(measurement, metadata))
                .await;
            if let Err(e) = started {
                for task in &tasks {
                    task.abort();
                }
                for id in subscriptions {
                    self.release(id).await;
                }
                return Err(e.into());
            }
        }

        *running = Some(Running {
            subscriptions,
            tasks,
        });

        info!(
            publisher_id = %self.bus.publisher_id(),
            recovery = self.recovery.is_some(),
            "Listener started"
        );
        Ok(())
    }

    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        if let Some(recovery) = &self.recovery {
            recovery.stop().await;
        }
        for task in running.tasks {
            task.abort();
        }
        for id in running.subscriptions {
            self.release(id).await;
        }

        info!(publisher_id = %self.bus.publisher_id(), "Listener stopped");
    }

    pub(crate) fn monitors(&self) -> &Monitors {
        &self.monitors
    }

    pub fn recovery(&self) -> Option<&Arc<RecoveryOrchestrator>> {
        self.recovery.as_ref()
    }

    fn spawn_listener<F>(&self, mut subscription: Subscription, handle: F) -> JoinHandle<()>
    where
        F: Fn(&Monitors, SystemMessage, &MessageMetadata) + Send + 'static,
    {
        let monitors = self.monitors.clone();
        tokio::spawn(async move {
            while let Some(envelope) = subscription.recv().await {
                match protocol::decode(&envelope.content) {
                    Ok(message) => handle(&monitors, message, &envelope.metadata),
                    Err(e) => debug!(
                        topic = %envelope.topic,
                        error = %e,
                        "Ignoring undecodable message"
                    ),
                }
            }
        })
    }

    async fn release(&self, id: SubscriptionId) {
        if let Err(e) = self.bus.unsubscribe(id).await {
            warn!(subscription = %id, error = %e, "Unsubscribe failed");
        }
    }
}
