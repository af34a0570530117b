//! Broker types and configuration

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default number of retained measurement records
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Default number of records per recovery page
pub const DEFAULT_PAGE_SIZE: usize = 200;

/// Default cap on pages replayed for a single request
pub const DEFAULT_MAX_PAGES: usize = 10;

/// Default pause between consecutive pages
pub const DEFAULT_PAGE_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the retention buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Maximum number of records kept; older ones are evicted first
    pub capacity: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Configuration for replaying history to recovering consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Records per RecoveryResponse
    pub page_size: usize,

    /// Pages sent before a reply is truncated
    pub max_pages: usize,

    /// Self-throttling delay after each page
    #[serde(rename = "page_interval_ms", with = "crate::config::duration_ms")]
    pub page_interval: Duration,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            page_interval: DEFAULT_PAGE_INTERVAL,
        }
    }
}

/// Complete broker configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub retention: RetentionConfig,
    pub responder: ResponderConfig,
}

/// Diagnostic events raised by the retention buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionEvent {
    /// Oldest records dropped to stay within capacity
    Evicted { count: usize, retained: usize },
}

/// Outcome of answering one recovery request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplySummary {
    pub pages: usize,
    pub records: usize,
    pub fulfilled: bool,
}

/// Statistics for a broker node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStats {
    /// Measurements accepted into retention
    pub records_ingested: u64,

    /// Records dropped by capacity eviction
    pub records_evicted: u64,

    /// Records currently retained
    pub records_retained: u64,

    /// Confirmations published for ingested measurements
    pub confirmations_published: u64,

    /// Recovery requests answered with a RecoveryComplete
    pub requests_served: u64,

    /// RecoveryResponse pages published
    pub pages_sent: u64,

    /// Replies cut short by the page cap
    pub replies_truncated: u64,
}

impl std::fmt::Display for BrokerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Broker: {} ingested, {} retained, {} evicted, {} requests served ({} pages, {} truncated)",
            self.records_ingested,
            self.records_retained,
            self.records_evicted,
            self.requests_served,
            self.pages_sent,
            self.replies_truncated
        )
    }
}

#[derive(Default)]
pub(crate) struct BrokerCounters {
    pub records_ingested: AtomicU64,
    pub confirmations_published: AtomicU64,
    pub requests_served: AtomicU64,
    pub pages_sent: AtomicU64,
    pub replies_truncated: AtomicU64,
}

impl BrokerCounters {
    pub fn incr(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.retention.capacity, 10_000);
        assert_eq!(config.responder.page_size, 200);
        assert_eq!(config.responder.max_pages, 10);
        assert_eq!(config.responder.page_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_responder_config_from_toml() {
        let config: ResponderConfig =
            toml::from_str("page_size = 50\npage_interval_ms = 5\n").unwrap();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.max_pages, DEFAULT_MAX_PAGES);
        assert_eq!(config.page_interval, Duration::from_millis(5));
    }
}
