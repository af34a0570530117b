//! Validating consumer
//!
//! Checks per-publisher sequence continuity of live measurements, broker
//! confirmations and recovered history.

pub mod error;
pub mod gap_monitor;
pub mod listener;
pub mod node;
pub mod types;

pub use error::{ValidatorError, ValidatorResult};
pub use gap_monitor::{GapMonitor, GapObservation, GapSummary};
pub use listener::Listener;
pub use node::Validator;
pub use types::{ValidatorConfig, ValidatorSummary};
