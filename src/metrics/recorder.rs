//! Metrics recorder for broker, recovery and gap monitoring
//!
//! Thin wrappers over the `metrics` macros so metric names live in one place.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }
    describe_metrics();
}

fn describe_metrics() {
    // Broker
    describe_counter!(
        "sensorstream_records_ingested_total",
        "Measurements accepted into retention"
    );
    describe_counter!(
        "sensorstream_records_evicted_total",
        "Records dropped by retention capacity"
    );
    describe_gauge!(
        "sensorstream_retention_records",
        "Records currently retained"
    );
    describe_counter!(
        "sensorstream_confirmations_published_total",
        "Confirmations published by brokers"
    );
    describe_counter!(
        "sensorstream_recovery_requests_served_total",
        "Recovery requests answered"
    );
    describe_counter!(
        "sensorstream_recovery_pages_sent_total",
        "RecoveryResponse pages published"
    );
    describe_histogram!(
        "sensorstream_recovery_page_records",
        "Records carried per RecoveryResponse page"
    );
    describe_counter!(
        "sensorstream_recovery_replies_truncated_total",
        "Replies cut short by the page cap"
    );

    // Consumer
    describe_counter!(
        "sensorstream_recovery_rounds_total",
        "Recovery rounds started, by reason"
    );
    describe_counter!(
        "sensorstream_recovery_satisfied_total",
        "Recoveries that reached the satisfied state"
    );
    describe_counter!(
        "sensorstream_recovered_measurements_total",
        "Measurements delivered from recovery pages"
    );
    describe_histogram!(
        "sensorstream_recovery_round_duration_seconds",
        "Time from request to last completion of a round"
    );

    // Gap monitor
    describe_counter!(
        "sensorstream_gap_observations_total",
        "Sequence numbers observed, by subject"
    );
    describe_counter!(
        "sensorstream_gap_lost_total",
        "Sequence numbers skipped, by subject"
    );
    describe_counter!(
        "sensorstream_gap_anomalies_total",
        "Non-increasing sequence numbers, by subject"
    );
}

// ============== Broker ==============

pub fn record_ingested(retained: usize) {
    counter!("sensorstream_records_ingested_total").increment(1);
    gauge!("sensorstream_retention_records").set(retained as f64);
}

pub fn record_evicted(count: usize) {
    counter!("sensorstream_records_evicted_total").increment(count as u64);
}

pub fn record_confirmation_published() {
    counter!("sensorstream_confirmations_published_total").increment(1);
}

pub fn record_page_sent(records: usize) {
    counter!("sensorstream_recovery_pages_sent_total").increment(1);
    histogram!("sensorstream_recovery_page_records").record(records as f64);
}

pub fn record_request_served(fulfilled: bool) {
    counter!("sensorstream_recovery_requests_served_total").increment(1);
    if !fulfilled {
        counter!("sensorstream_recovery_replies_truncated_total").increment(1);
    }
}

// ============== Consumer ==============

pub fn record_round_started(reason: &'static str) {
    counter!("sensorstream_recovery_rounds_total", "reason" => reason).increment(1);
}

pub fn record_satisfied() {
    counter!("sensorstream_recovery_satisfied_total").increment(1);
}

pub fn record_recovered(count: usize) {
    counter!("sensorstream_recovered_measurements_total").increment(count as u64);
}

// ============== Gap monitor ==============

pub fn record_observation(subject: &'static str) {
    counter!("sensorstream_gap_observations_total", "subject" => subject).increment(1);
}

pub fn record_lost(subject: &'static str, lost: u64) {
    counter!("sensorstream_gap_lost_total", "subject" => subject).increment(lost);
}

pub fn record_anomaly(subject: &'static str) {
    counter!("sensorstream_gap_anomalies_total", "subject" => subject).increment(1);
}

/// Times a recovery round from request to completion
pub struct RoundTimer {
    start_time: Instant,
}

impl RoundTimer {
    pub fn start() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Stop timing and record the duration
    pub fn stop(self) {
        histogram!("sensorstream_recovery_round_duration_seconds")
            .record(self.start_time.elapsed().as_secs_f64());
    }
}
