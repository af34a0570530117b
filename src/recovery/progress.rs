//! Per-broker progress within a recovery round

use crate::protocol::PublisherId;
use crate::recovery::error::{RecoveryError, RecoveryResult};
use crate::recovery::types::{AggregateProgress, BrokerProgress};
use std::collections::HashMap;

/// Tracks one `BrokerProgress` per responding broker.
///
/// Known brokers are always present and gate completion. Other publishers
/// are tracked when they answer but never block the verdict, unless no
/// broker is configured at all.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    known: Vec<PublisherId>,
    entries: HashMap<PublisherId, BrokerProgress>,
    low_water_mark: Option<u64>,
}

impl ProgressTracker {
    pub fn new(known: Vec<PublisherId>) -> Self {
        let entries = known
            .iter()
            .map(|id| (id.clone(), BrokerProgress::default()))
            .collect();

        Self {
            known,
            entries,
            low_water_mark: None,
        }
    }

    pub fn known_brokers(&self) -> &[PublisherId] {
        &self.known
    }

    pub fn get(&self, publisher: &PublisherId) -> Option<BrokerProgress> {
        self.entries.get(publisher).copied()
    }

    /// Start point of the previous round, carried across rounds
    pub fn low_water_mark(&self) -> Option<u64> {
        self.low_water_mark
    }

    /// Where the next round should resume from.
    ///
    /// The aggregate timestamp when every tracked broker reported, otherwise
    /// the previous round's start point, otherwise the beginning of time.
    pub fn resume_point(&self) -> u64 {
        self.aggregate()
            .timestamp
            .or(self.low_water_mark)
            .unwrap_or(0)
    }

    /// Compute the start point for a new round and reset all progress.
    pub fn begin_round(&mut self) -> u64 {
        let from = self.resume_point();
        self.low_water_mark = Some(from);

        self.entries.clear();
        for id in &self.known {
            self.entries.insert(id.clone(), BrokerProgress::default());
        }

        from
    }

    /// Accept one page from `publisher`.
    ///
    /// `newest` is the timestamp of the last record in the page, if any.
    pub fn apply_response(
        &mut self,
        publisher: &PublisherId,
        seq_num: u64,
        newest: Option<u64>,
    ) -> RecoveryResult<()> {
        let progress = self.check_sequence(publisher, seq_num)?;

        if let Some(ts) = newest {
            progress.timestamp = Some(ts);
        }
        progress.last_seq_num = Some(seq_num);
        Ok(())
    }

    /// Accept the terminal marker from `publisher`.
    ///
    /// `timestamp` seeds the broker's progress when it sent no records.
    /// The marker does not consume a sequence number, so a redelivered
    /// copy of the same marker is accepted and returns `false`.
    pub fn apply_complete(
        &mut self,
        publisher: &PublisherId,
        seq_num: u64,
        is_fulfilled: bool,
        timestamp: u64,
    ) -> RecoveryResult<bool> {
        if let Some(progress) = self.entries.get(publisher) {
            if progress.is_complete
                && progress.expected_seq_num() == seq_num
                && progress.is_fulfilled == is_fulfilled
            {
                return Ok(false);
            }
        }

        let progress = self.check_sequence(publisher, seq_num)?;

        if progress.timestamp.is_none() {
            progress.timestamp = Some(timestamp);
        }
        progress.is_complete = true;
        progress.is_fulfilled = is_fulfilled;
        Ok(true)
    }

    pub fn aggregate(&self) -> AggregateProgress {
        let tracked: Vec<&BrokerProgress> = if self.known.is_empty() {
            self.entries.values().collect()
        } else {
            self.known
                .iter()
                .filter_map(|id| self.entries.get(id))
                .collect()
        };

        let reported = tracked.iter().filter(|p| p.has_reported()).count();
        if tracked.is_empty() || reported < tracked.len() {
            return AggregateProgress {
                is_complete: false,
                is_fulfilled: false,
                timestamp: None,
                tracked: tracked.len(),
                reported,
            };
        }

        AggregateProgress {
            is_complete: tracked.iter().all(|p| p.is_complete),
            is_fulfilled: tracked.iter().all(|p| p.is_fulfilled),
            timestamp: tracked.iter().filter_map(|p| p.timestamp).min(),
            tracked: tracked.len(),
            reported,
        }
    }

    fn check_sequence(
        &mut self,
        publisher: &PublisherId,
        seq_num: u64,
    ) -> RecoveryResult<&mut BrokerProgress> {
        let progress = self.entries.entry(publisher.clone()).or_default();

        if progress.is_complete {
            return Err(RecoveryError::AfterComplete(publisher.to_string()));
        }

        let expected = progress.expected_seq_num();
        if seq_num != expected {
            return Err(RecoveryError::SequenceViolation {
                publisher: publisher.to_string(),
                expected,
                actual: seq_num,
            });
        }

        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PublisherId {
        PublisherId::new(s)
    }

    fn tracker() -> ProgressTracker {
        ProgressTracker::new(vec![id("a"), id("b")])
    }

    #[test]
    fn test_incomplete_until_all_report() {
        let mut t = tracker();
        assert!(!t.aggregate().is_complete);

        t.apply_complete(&id("a"), 0, true, 100).unwrap();
        let agg = t.aggregate();
        assert!(!agg.is_complete);
        assert_eq!(agg.timestamp, None);
        assert_eq!(agg.reported, 1);

        t.apply_complete(&id("b"), 0, true, 200).unwrap();
        let agg = t.aggregate();
        assert!(agg.is_satisfied());
        assert_eq!(agg.timestamp, Some(100));
    }

    #[test]
    fn test_reported_but_not_complete() {
        let mut t = tracker();
        t.apply_response(&id("a"), 0, Some(50)).unwrap();
        t.apply_complete(&id("b"), 0, true, 80).unwrap();

        let agg = t.aggregate();
        assert!(!agg.is_complete);
        assert_eq!(agg.timestamp, Some(50));
    }

    #[test]
    fn test_sequence_must_be_contiguous() {
        let mut t = tracker();
        let err = t.apply_response(&id("a"), 2, Some(10)).unwrap_err();
        assert!(matches!(
            err,
            RecoveryError::SequenceViolation {
                expected: 0,
                actual: 2,
                ..
            }
        ));

        t.apply_response(&id("a"), 0, Some(10)).unwrap();
        t.apply_response(&id("a"), 1, Some(20)).unwrap();
        assert!(t.apply_complete(&id("a"), 1, true, 30).is_err());
        t.apply_complete(&id("a"), 2, true, 30).unwrap();

        // Timestamp reflects the newest delivered record, not the completion
        assert_eq!(t.get(&id("a")).unwrap().timestamp, Some(20));
    }

    #[test]
    fn test_reply_after_complete_is_rejected() {
        let mut t = tracker();
        t.apply_complete(&id("a"), 0, true, 10).unwrap();
        assert!(matches!(
            t.apply_response(&id("a"), 1, Some(20)),
            Err(RecoveryError::AfterComplete(_))
        ));
    }

    #[test]
    fn test_redelivered_complete_is_a_no_op() {
        let mut t = tracker();
        t.apply_response(&id("a"), 0, Some(10)).unwrap();
        assert!(t.apply_complete(&id("a"), 1, true, 30).unwrap());
        assert!(!t.apply_complete(&id("a"), 1, true, 30).unwrap());

        let progress = t.get(&id("a")).unwrap();
        assert_eq!(progress.last_seq_num, Some(0));
        assert!(progress.is_complete);

        // A different marker or a page after completion is still a violation
        assert!(matches!(
            t.apply_complete(&id("a"), 1, false, 30),
            Err(RecoveryError::AfterComplete(_))
        ));
        assert!(matches!(
            t.apply_response(&id("a"), 1, Some(20)),
            Err(RecoveryError::AfterComplete(_))
        ));
    }

    #[test]
    fn test_unknown_publisher_does_not_block() {
        let mut t = tracker();
        t.apply_complete(&id("stranger"), 0, false, 5).unwrap();
        t.apply_complete(&id("a"), 0, true, 100).unwrap();
        t.apply_complete(&id("b"), 0, true, 100).unwrap();

        assert!(t.aggregate().is_satisfied());
        assert!(t.get(&id("stranger")).is_some());
    }

    #[test]
    fn test_empty_allow_list_uses_every_publisher() {
        let mut t = ProgressTracker::new(Vec::new());
        assert!(!t.aggregate().is_complete);
        assert_eq!(t.aggregate().tracked, 0);

        t.apply_complete(&id("x"), 0, true, 7).unwrap();
        assert!(t.aggregate().is_satisfied());
    }

    #[test]
    fn test_zero_timestamp_is_a_report() {
        let mut t = tracker();
        t.apply_complete(&id("a"), 0, true, 0).unwrap();
        t.apply_complete(&id("b"), 0, true, 0).unwrap();
        let agg = t.aggregate();
        assert!(agg.is_satisfied());
        assert_eq!(agg.timestamp, Some(0));
    }

    #[test]
    fn test_begin_round_resets_and_carries_low_water_mark() {
        let mut t = tracker();
        assert_eq!(t.low_water_mark(), None);
        assert_eq!(t.begin_round(), 0);
        assert_eq!(t.low_water_mark(), Some(0));

        t.apply_response(&id("a"), 0, Some(300)).unwrap();
        t.apply_complete(&id("a"), 1, false, 900).unwrap();
        t.apply_complete(&id("b"), 0, true, 500).unwrap();
        t.apply_complete(&id("stranger"), 0, true, 1).unwrap();

        // Slowest broker decides where the next round resumes
        assert_eq!(t.resume_point(), 300);
        assert_eq!(t.begin_round(), 300);
        assert_eq!(t.get(&id("a")), Some(BrokerProgress::default()));
        assert!(t.get(&id("stranger")).is_none());

        // Only one broker reports before the next restart: keep the mark
        t.apply_response(&id("b"), 0, Some(800)).unwrap();
        assert_eq!(t.begin_round(), 300);
    }
}
