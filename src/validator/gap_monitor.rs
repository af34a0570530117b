//! Sequence continuity per publisher
//!
//! Purely observational: a monitor logs and counts gaps but never feeds back
//! into recovery.

use crate::metrics::recorder;
use crate::protocol::PublisherId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, warn};

/// Result of observing one sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapObservation {
    /// First number seen from this publisher
    First,
    InOrder,
    /// Forward jump; `lost` numbers were skipped
    Gap { lost: u64 },
    /// Repeated or older number
    Anomaly { previous: u64, current: u64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapSummary {
    pub subject: String,
    pub publishers: usize,
    pub count: u64,
    pub lost: u64,
    pub anomalies: u64,
}

impl std::fmt::Display for GapSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} observed from {} publishers, {} lost, {} anomalies",
            self.subject, self.count, self.publishers, self.lost, self.anomalies
        )
    }
}

pub struct GapMonitor {
    subject: &'static str,
    last_seen: DashMap<PublisherId, u64>,
    count: AtomicU64,
    lost: AtomicU64,
    anomalies: AtomicU64,
}

impl GapMonitor {
    pub fn new(subject: &'static str) -> Self {
        Self {
            subject,
            last_seen: DashMap::new(),
            count: AtomicU64::new(0),
            lost: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
        }
    }

    pub fn subject(&self) -> &'static str {
        self.subject
    }

    pub fn observe(&self, publisher: &PublisherId, seq_num: u64) -> GapObservation {
        self.count.fetch_add(1, Ordering::Relaxed);
        recorder::record_observation(self.subject);

        let observation = match self.last_seen.entry(publisher.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(seq_num);
                GapObservation::First
            }
            Entry::Occupied(mut entry) => {
                let previous = *entry.get();
                if seq_num <= previous {
                    GapObservation::Anomaly {
                        previous,
                        current: seq_num,
                    }
                } else {
                    entry.insert(seq_num);
                    match seq_num - previous - 1 {
                        0 => GapObservation::InOrder,
                        lost => GapObservation::Gap { lost },
                    }
                }
            }
        };

        match observation {
            GapObservation::Gap { lost } => {
                self.lost.fetch_add(lost, Ordering::Relaxed);
                recorder::record_lost(self.subject, lost);
                error!(
                    subject = self.subject,
                    publisher_id = %publisher,
                    curr = seq_num,
                    lost,
                    "Unexpected sequence gap"
                );
            }
            GapObservation::Anomaly { previous, current } => {
                self.anomalies.fetch_add(1, Ordering::Relaxed);
                recorder::record_anomaly(self.subject);
                warn!(
                    subject = self.subject,
                    publisher_id = %publisher,
                    prev = previous,
                    curr = current,
                    "Non-increasing sequence number"
                );
            }
            GapObservation::First | GapObservation::InOrder => {}
        }

        observation
    }

    pub fn last_seen(&self, publisher: &PublisherId) -> Option<u64> {
        self.last_seen.get(publisher).map(|v| *v)
    }

    pub fn summary(&self) -> GapSummary {
        GapSummary {
            subject: self.subject.to_string(),
            publishers: self.last_seen.len(),
            count: self.count.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_and_in_order() {
        let monitor = GapMonitor::new("measurement");
        let p = PublisherId::new("sensor-1");

        // Zero is a real sequence number, not "unseen"
        assert_eq!(monitor.observe(&p, 0), GapObservation::First);
        assert_eq!(monitor.observe(&p, 1), GapObservation::InOrder);
        assert_eq!(monitor.observe(&p, 2), GapObservation::InOrder);
        assert_eq!(monitor.summary().lost, 0);
    }

    #[test]
    fn test_gap_counts_skipped_numbers() {
        let monitor = GapMonitor::new("measurement");
        let p = PublisherId::new("sensor-1");

        monitor.observe(&p, 0);
        assert_eq!(monitor.observe(&p, 5), GapObservation::Gap { lost: 4 });
        assert_eq!(monitor.observe(&p, 6), GapObservation::InOrder);

        let summary = monitor.summary();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.lost, 4);
    }

    #[test]
    fn test_anomaly_keeps_high_water_mark() {
        let monitor = GapMonitor::new("confirmation");
        let p = PublisherId::new("broker-a");

        monitor.observe(&p, 10);
        assert_eq!(
            monitor.observe(&p, 10),
            GapObservation::Anomaly {
                previous: 10,
                current: 10
            }
        );
        assert_eq!(
            monitor.observe(&p, 3),
            GapObservation::Anomaly {
                previous: 10,
                current: 3
            }
        );
        assert_eq!(monitor.last_seen(&p), Some(10));
        assert_eq!(monitor.observe(&p, 11), GapObservation::InOrder);
        assert_eq!(monitor.summary().anomalies, 2);
    }

    #[test]
    fn test_publishers_are_independent() {
        let monitor = GapMonitor::new("measurement");
        let a = PublisherId::new("a");
        let b = PublisherId::new("b");

        monitor.observe(&a, 1);
        monitor.observe(&b, 100);
        assert_eq!(monitor.observe(&a, 2), GapObservation::InOrder);
        assert_eq!(monitor.observe(&b, 101), GapObservation::InOrder);
        assert_eq!(monitor.summary().publishers, 2);
    }
}
