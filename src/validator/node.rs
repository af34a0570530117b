//! Validator node
//!
//! A consumer that checks sequence continuity of everything it receives
//! and, optionally, recovers the history it missed before starting.

use crate::recovery::{RecoveryConfig, RecoveryOrchestrator};
use crate::transport::{PubSub, Topics};
use crate::validator::error::ValidatorResult;
use crate::validator::listener::Listener;
use crate::validator::types::{ValidatorConfig, ValidatorSummary};
use std::sync::Arc;
use tracing::info;

pub struct Validator {
    listener: Listener,
}

impl Validator {
    pub fn new(
        bus: Arc<dyn PubSub>,
        topics: Topics,
        config: ValidatorConfig,
        recovery: RecoveryConfig,
    ) -> Self {
        let orchestrator = config
            .recovery
            .then(|| RecoveryOrchestrator::new(bus.clone(), topics.clone(), recovery));

        Self {
            listener: Listener::new(bus, topics, config.log_every, orchestrator),
        }
    }

    pub async fn start(&self) -> ValidatorResult<()> {
        self.listener.start().await?;
        info!("Validator started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.listener.stop().await;
        info!("Validator stopped");
    }

    pub fn recovery(&self) -> Option<&Arc<RecoveryOrchestrator>> {
        self.listener.recovery()
    }

    pub fn summary(&self) -> ValidatorSummary {
        let monitors = self.listener.monitors();
        ValidatorSummary {
            measurements: monitors.measurements.summary(),
            confirmations: monitors.confirmations.summary(),
            recovered: monitors.recovered.summary(),
            recovery_state: self.recovery().map(|r| r.state()),
        }
    }
}
