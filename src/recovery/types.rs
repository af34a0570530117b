use crate::protocol::PublisherId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default delay before the first round, lets transport connections settle
pub const DEFAULT_START_DELAY: Duration = Duration::from_secs(5);

/// Default back-off before restarting a round that failed on a protocol error
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(30);

/// Default silence window after which a round is abandoned
pub const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Broker identities whose answers are required before recovery is satisfied
    pub known_brokers: Vec<PublisherId>,

    #[serde(rename = "start_delay_ms", with = "crate::config::duration_ms")]
    pub start_delay: Duration,

    #[serde(rename = "restart_delay_ms", with = "crate::config::duration_ms")]
    pub restart_delay: Duration,

    #[serde(rename = "activity_timeout_ms", with = "crate::config::duration_ms")]
    pub activity_timeout: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            known_brokers: Vec::new(),
            start_delay: DEFAULT_START_DELAY,
            restart_delay: DEFAULT_RESTART_DELAY,
            activity_timeout: DEFAULT_ACTIVITY_TIMEOUT,
        }
    }
}

impl RecoveryConfig {
    pub fn with_brokers<I, P>(brokers: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PublisherId>,
    {
        Self {
            known_brokers: brokers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryState {
    Idle,
    AwaitingPeerFormation,
    InRound,
    RoundRestarting,
    Satisfied,
}

impl RecoveryState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RecoveryState::AwaitingPeerFormation
                | RecoveryState::InRound
                | RecoveryState::RoundRestarting
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryState::Satisfied)
    }
}

/// Why a round was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundReason {
    Initial,
    /// Every broker completed but at least one reply was truncated
    Unfulfilled,
    /// No qualifying message within the activity window
    Timeout,
    /// The previous round failed a sequence check
    ProtocolError,
}

impl RoundReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundReason::Initial => "initial",
            RoundReason::Unfulfilled => "unfulfilled",
            RoundReason::Timeout => "timeout",
            RoundReason::ProtocolError => "protocol_error",
        }
    }
}

impl fmt::Display for RoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one broker within the current round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerProgress {
    /// Last accepted sequence number, `None` before the first page
    pub last_seq_num: Option<u64>,

    /// Newest point in time covered, `None` until the broker reports
    pub timestamp: Option<u64>,

    pub is_complete: bool,
    pub is_fulfilled: bool,
}

impl BrokerProgress {
    /// Sequence number the next message from this broker must carry
    pub fn expected_seq_num(&self) -> u64 {
        self.last_seq_num.map_or(0, |seq| seq + 1)
    }

    pub fn has_reported(&self) -> bool {
        self.timestamp.is_some()
    }
}

/// Readiness verdict derived from every tracked broker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateProgress {
    pub is_complete: bool,
    pub is_fulfilled: bool,

    /// Oldest of the brokers' timestamps, `None` while any broker is silent
    pub timestamp: Option<u64>,

    /// Brokers counted in the verdict
    pub tracked: usize,

    /// Brokers that reported at least once this round
    pub reported: usize,
}

impl AggregateProgress {
    pub fn is_satisfied(&self) -> bool {
        self.is_complete && self.is_fulfilled
    }
}

/// Lifecycle notifications from a recovery orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryEvent {
    RoundStarted {
        request_id: String,
        from: u64,
        reason: RoundReason,
    },
    RoundFailed {
        request_id: String,
        error: String,
    },
    ActivityTimeout {
        request_id: String,
    },
    Satisfied {
        request_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_seq_num() {
        let mut progress = BrokerProgress::default();
        assert_eq!(progress.expected_seq_num(), 0);
        progress.last_seq_num = Some(4);
        assert_eq!(progress.expected_seq_num(), 5);
    }

    #[test]
    fn test_zero_timestamp_counts_as_reported() {
        let progress = BrokerProgress {
            timestamp: Some(0),
            ..Default::default()
        };
        assert!(progress.has_reported());
        assert!(!BrokerProgress::default().has_reported());
    }

    #[test]
    fn test_config_from_toml() {
        let config: RecoveryConfig = toml::from_str(
            r#"
            known_brokers = ["broker-a", "broker-b"]
            activity_timeout_ms = 1500
            "#,
        )
        .unwrap();

        assert_eq!(
            config.known_brokers,
            vec![PublisherId::new("broker-a"), PublisherId::new("broker-b")]
        );
        assert_eq!(config.activity_timeout, Duration::from_millis(1500));
        assert_eq!(config.start_delay, DEFAULT_START_DELAY);
    }

    #[test]
    fn test_state_predicates() {
        assert!(RecoveryState::InRound.is_active());
        assert!(!RecoveryState::Idle.is_active());
        assert!(RecoveryState::Satisfied.is_terminal());
    }
}
