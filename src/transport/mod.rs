//! Pub/sub transport
//!
//! The recovery core only depends on the `PubSub` trait. `MemoryBus` is the
//! in-process implementation used by the simulation binary and the tests.

pub mod bus;
pub mod error;
pub mod memory;
pub mod types;

pub use bus::PubSub;
pub use error::{TransportError, TransportResult};
pub use memory::{BusClient, BusStats, MemoryBus};
pub use types::{now_millis, Envelope, Subscription, SubscriptionId, Topics};
