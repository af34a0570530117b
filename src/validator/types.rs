use crate::recovery::RecoveryState;
use crate::validator::gap_monitor::GapSummary;
use serde::{Deserialize, Serialize};

/// Default number of sequence numbers between progress logs
pub const DEFAULT_LOG_EVERY: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Run a recovery orchestrator alongside the live listener
    pub recovery: bool,

    /// Log every n-th sequence number (0 disables)
    pub log_every: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            recovery: true,
            log_every: DEFAULT_LOG_EVERY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSummary {
    pub measurements: GapSummary,
    pub confirmations: GapSummary,
    pub recovered: GapSummary,
    pub recovery_state: Option<RecoveryState>,
}

impl std::fmt::Display for ValidatorSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}; {}; {}",
            self.measurements, self.confirmations, self.recovered
        )?;
        if let Some(state) = self.recovery_state {
            write!(f, "; recovery {:?}", state)?;
        }
        Ok(())
    }
}
