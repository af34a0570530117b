//! Bounded retention of recent measurements
//!
//! Records are kept in insertion order. After every insert that pushes the
//! buffer past capacity the oldest records are dropped in one batch, so
//! `len() <= capacity()` holds between calls.

use crate::broker::types::RetentionEvent;
use crate::protocol::MeasurementRecord;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Retention buffer shared between ingestion and replay
pub type SharedRetention = Arc<RwLock<RetentionBuffer>>;

pub struct RetentionBuffer {
    records: VecDeque<Arc<MeasurementRecord>>,
    capacity: usize,
    evicted_total: u64,
    events: broadcast::Sender<RetentionEvent>,
}

impl RetentionBuffer {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            records: VecDeque::with_capacity(capacity.min(16 * 1024)),
            capacity,
            evicted_total: 0,
            events,
        }
    }

    pub fn shared(capacity: usize) -> SharedRetention {
        Arc::new(RwLock::new(Self::new(capacity)))
    }

    /// Append a record, evicting the oldest ones if capacity is exceeded.
    ///
    /// Returns the number of evicted records.
    pub fn ingest(&mut self, record: MeasurementRecord) -> usize {
        self.records.push_back(Arc::new(record));

        let excess = self.records.len().saturating_sub(self.capacity);
        if excess == 0 {
            return 0;
        }

        self.records.drain(..excess);
        self.evicted_total += excess as u64;

        // Nobody listening is fine, the signal is diagnostic only
        let _ = self.events.send(RetentionEvent::Evicted {
            count: excess,
            retained: self.records.len(),
        });

        excess
    }

    /// Records with `from <= timestamp < to`, in insertion order.
    ///
    /// `to == 0` means no upper bound.
    pub fn query(&self, from: u64, to: u64) -> Vec<Arc<MeasurementRecord>> {
        let to = if to == 0 { u64::MAX } else { to };
        self.records
            .iter()
            .filter(|r| r.timestamp() >= from && r.timestamp() < to)
            .cloned()
            .collect()
    }

    /// Receive eviction events
    pub fn subscribe_events(&self) -> broadcast::Receiver<RetentionEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    pub fn oldest_timestamp(&self) -> Option<u64> {
        self.records.front().map(|r| r.timestamp())
    }

    pub fn newest_timestamp(&self) -> Option<u64> {
        self.records.back().map(|r| r.timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Measurement, MessageMetadata};

    fn record(seq_num: u64, timestamp: u64) -> MeasurementRecord {
        MeasurementRecord::new(
            Measurement {
                sensor_id: "s".into(),
                seq_num,
                pressure: 1000.0,
                temperature: 100.0,
            },
            MessageMetadata::new("sensor".into(), timestamp, "sig"),
        )
    }

    fn seq_nums(records: &[Arc<MeasurementRecord>]) -> Vec<u64> {
        records.iter().map(|r| r.message.seq_num).collect()
    }

    #[test]
    fn test_ingest_within_capacity() {
        let mut buffer = RetentionBuffer::new(10);
        for i in 0..10 {
            assert_eq!(buffer.ingest(record(i, i)), 0);
        }
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.evicted_total(), 0);
    }

    #[test]
    fn test_keeps_most_recent_records() {
        let mut buffer = RetentionBuffer::new(5);
        for i in 0..12 {
            buffer.ingest(record(i, i * 10));
            assert!(buffer.len() <= 5);
        }

        assert_eq!(seq_nums(&buffer.query(0, 0)), vec![7, 8, 9, 10, 11]);
        assert_eq!(buffer.evicted_total(), 7);
        assert_eq!(buffer.oldest_timestamp(), Some(70));
        assert_eq!(buffer.newest_timestamp(), Some(110));
    }

    #[test]
    fn test_eviction_signal() {
        let mut buffer = RetentionBuffer::new(2);
        let mut events = buffer.subscribe_events();

        buffer.ingest(record(0, 0));
        buffer.ingest(record(1, 1));
        assert!(events.try_recv().is_err());

        buffer.ingest(record(2, 2));
        assert_eq!(
            events.try_recv().unwrap(),
            RetentionEvent::Evicted {
                count: 1,
                retained: 2
            }
        );
    }

    #[test]
    fn test_query_half_open_range() {
        let mut buffer = RetentionBuffer::new(100);
        for i in 0..10 {
            buffer.ingest(record(i, i * 10));
        }

        // [20, 50) -> 20, 30, 40
        assert_eq!(seq_nums(&buffer.query(20, 50)), vec![2, 3, 4]);
        // unbounded upper end
        assert_eq!(seq_nums(&buffer.query(70, 0)), vec![7, 8, 9]);
        // empty
        assert!(buffer.query(95, 0).is_empty());
        assert!(buffer.query(30, 30).is_empty());
    }

    #[test]
    fn test_query_preserves_insertion_order() {
        let mut buffer = RetentionBuffer::new(100);
        buffer.ingest(record(0, 30));
        buffer.ingest(record(1, 10));
        buffer.ingest(record(2, 20));

        assert_eq!(seq_nums(&buffer.query(0, 0)), vec![0, 1, 2]);
    }

    #[test]
    fn test_query_shares_records() {
        let mut buffer = RetentionBuffer::new(10);
        buffer.ingest(record(0, 0));

        let first = buffer.query(0, 0);
        let second = buffer.query(0, 0);
        assert!(Arc::ptr_eq(&first[0], &second[0]));
    }
}
