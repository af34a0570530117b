//! Broker side of the system
//!
//! A broker ingests live measurements into a bounded retention buffer,
//! confirms each one, and answers recovery requests by paging matching
//! history back on the recovery topic.

pub mod cache;
pub mod error;
pub mod node;
pub mod responder;
pub mod retention;
pub mod types;

pub use cache::Cache;
pub use error::{BrokerError, BrokerResult};
pub use node::Broker;
pub use responder::RecoveryResponder;
pub use retention::{RetentionBuffer, SharedRetention};
pub use types::{
    BrokerConfig, BrokerStats, ReplySummary, ResponderConfig, RetentionConfig, RetentionEvent,
};
