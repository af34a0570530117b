//! Metrics and observability module
//!
//! Prometheus-compatible metrics for brokers and recovering consumers:
//! - Retention ingest and eviction
//! - Recovery replay traffic (requests, pages, truncation)
//! - Recovery rounds and their outcome
//! - Sequence gaps seen by the gap monitors

pub mod exporter;
pub mod recorder;

pub use exporter::{start_metrics_server, MetricsConfig, MetricsError};
pub use recorder::{init_metrics, RoundTimer};
