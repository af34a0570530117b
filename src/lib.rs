//! Sensor measurement streaming with multi-broker gap recovery.
//!
//! Sensors publish measurements on a shared pub/sub bus. Brokers keep a
//! bounded window of recent measurements and replay it on request. A
//! consumer that missed traffic runs recovery rounds against every known
//! broker until all of them confirm complete, untruncated replies.

pub mod broker;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod recovery;
pub mod sensor;
pub mod transport;
pub mod validator;

pub use broker::{Broker, BrokerConfig, RetentionBuffer};
pub use config::{Config, ConfigError};
pub use protocol::{MeasurementRecord, MessageMetadata, PublisherId, SystemMessage};
pub use recovery::{ActivityWatchdog, RecoveryOrchestrator, RecoveryState};
pub use sensor::Sensor;
pub use transport::{MemoryBus, PubSub, Topics};
pub use validator::{GapMonitor, Validator};
