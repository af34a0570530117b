//! Synthetic measurement driver
//!
//! A sensor publishes one reading per tick on the measurement topic. It can
//! start with a rapid interval to fill broker caches quickly and then fall
//! back to its normal pace.

use crate::protocol::{self, Measurement, SystemMessage};
use crate::transport::{PubSub, Topics};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_RAPID_THRESHOLD: u64 = 2000;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Invalid sensor configuration: {0}")]
    InvalidConfig(String),
}

pub type SensorResult<T> = Result<T, SensorError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    #[serde(rename = "interval_ms", with = "crate::config::duration_ms")]
    pub interval: Duration,

    /// Zero disables the rapid phase
    #[serde(rename = "rapid_interval_ms", with = "crate::config::duration_ms")]
    pub rapid_interval: Duration,

    /// Readings published at the rapid interval before slowing down
    pub rapid_threshold: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            rapid_interval: Duration::ZERO,
            rapid_threshold: DEFAULT_RAPID_THRESHOLD,
        }
    }
}

/// Reading number `counter` of a sensor
pub fn reading(sensor_id: &str, counter: u64) -> Measurement {
    Measurement {
        sensor_id: sensor_id.to_string(),
        seq_num: counter,
        pressure: 1000.0 + (counter % 10) as f64,
        temperature: 100.0 + (counter % 50) as f64,
    }
}

pub struct Sensor {
    id: String,
    bus: Arc<dyn PubSub>,
    topics: Topics,
    config: SensorConfig,
    counter: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Sensor {
    pub fn new(
        id: impl Into<String>,
        bus: Arc<dyn PubSub>,
        topics: Topics,
        config: SensorConfig,
    ) -> SensorResult<Self> {
        if config.interval.is_zero() {
            return Err(SensorError::InvalidConfig("interval must be positive".into()));
        }

        Ok(Self {
            id: id.into(),
            bus,
            topics,
            config,
            counter: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Readings published so far
    pub fn published(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let id = self.id.clone();
        let bus = self.bus.clone();
        let topic = self.topics.measurement.clone();
        let config = self.config.clone();
        let counter = self.counter.clone();

        info!(
            sensor = %self.id,
            interval_ms = config.interval.as_millis() as u64,
            rapid_interval_ms = config.rapid_interval.as_millis() as u64,
            "Sensor started"
        );

        *task = Some(tokio::spawn(async move {
            let rapid = !config.rapid_interval.is_zero()
                && counter.load(Ordering::Relaxed) < config.rapid_threshold;
            let mut ticker = tokio::time::interval(if rapid {
                config.rapid_interval
            } else {
                config.interval
            });
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut rapid = rapid;

            loop {
                ticker.tick().await;

                let seq_num = counter.load(Ordering::Relaxed);
                let message = SystemMessage::from(reading(&id, seq_num));
                counter.fetch_add(1, Ordering::Relaxed);

                match protocol::encode(&message) {
                    Ok(bytes) => {
                        if let Err(e) = bus.publish(&topic, bytes).await {
                            warn!(sensor = %id, seq_num, error = %e, "Failed to publish measurement");
                        }
                    }
                    Err(e) => warn!(sensor = %id, error = %e, "Failed to encode measurement"),
                }

                if rapid && seq_num + 1 >= config.rapid_threshold {
                    info!(
                        sensor = %id,
                        threshold = config.rapid_threshold,
                        "Threshold reached, switching to normal interval"
                    );
                    rapid = false;
                    ticker = tokio::time::interval_at(
                        tokio::time::Instant::now() + config.interval,
                        config.interval,
                    );
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                }
            }
        }));
    }

    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            info!(sensor = %self.id, published = self.published(), "Sensor stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryBus;

    #[test]
    fn test_reading_values() {
        let m = reading("s", 57);
        assert_eq!(m.seq_num, 57);
        assert_eq!(m.pressure, 1007.0);
        assert_eq!(m.temperature, 107.0);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let bus = MemoryBus::new();
        let config = SensorConfig {
            interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(Sensor::new("s", Arc::new(bus.client("s")), Topics::default(), config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_phase_then_normal_interval() {
        let bus = MemoryBus::new();
        let topics = Topics::default();
        let mut sub = bus.client("observer").subscribe(&topics.measurement).await.unwrap();

        let sensor = Sensor::new(
            "sensor-1",
            Arc::new(bus.client("sensor-1")),
            topics,
            SensorConfig {
                interval: Duration::from_secs(1),
                rapid_interval: Duration::from_millis(10),
                rapid_threshold: 5,
            },
        )
        .unwrap();
        sensor.start().await;

        // 5 rapid readings in ~50ms, then one per second
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sensor.published(), 5);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(sensor.published(), 7);

        sensor.stop().await;
        sensor.stop().await;

        let mut seqs = Vec::new();
        while let Ok(Some(envelope)) =
            tokio::time::timeout(Duration::from_millis(10), sub.recv()).await
        {
            match protocol::decode(&envelope.content).unwrap() {
                SystemMessage::Measurement(m) => seqs.push(m.seq_num),
                other => panic!("unexpected message: {:?}", other),
            }
        }
        assert_eq!(seqs, (0..7).collect::<Vec<_>>());
    }
}
