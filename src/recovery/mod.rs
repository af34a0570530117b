//! Consumer side gap recovery
//!
//! A consumer broadcasts one `RecoveryRequest` per round, tracks the paged
//! replies of every known broker and restarts the round on silence, on a
//! broken reply sequence, or when some broker could not cover the range.

pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod types;
pub mod watchdog;

pub use error::{RecoveryError, RecoveryResult};
pub use orchestrator::{MeasurementSink, RecoveryOrchestrator};
pub use progress::ProgressTracker;
pub use types::{
    AggregateProgress, BrokerProgress, RecoveryConfig, RecoveryEvent, RecoveryState, RoundReason,
};
pub use watchdog::{ActivityWatchdog, WatchdogTick};
