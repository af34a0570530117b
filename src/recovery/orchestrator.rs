//! Consumer side of multi-broker recovery
//!
//! One task owns the recovery subscription and a command queue fed by the
//! timers (peer formation delay, restart back-off, activity watchdog). All
//! round state lives behind a single mutex that is never held across an
//! await or while the measurement sink runs.

use crate::metrics::{recorder, RoundTimer};
use crate::protocol::{
    self, Measurement, MessageMetadata, PublisherId, RecoveryComplete, RecoveryRequest,
    RecoveryResponse, SystemMessage,
};
use crate::recovery::error::{RecoveryError, RecoveryResult};
use crate::recovery::progress::ProgressTracker;
use crate::recovery::types::{
    AggregateProgress, BrokerProgress, RecoveryConfig, RecoveryEvent, RecoveryState, RoundReason,
};
use crate::recovery::watchdog::{ActivityWatchdog, WatchdogTick};
use crate::transport::{Envelope, PubSub, SubscriptionId, Topics};
use parking_lot::Mutex;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Receives every recovered measurement in page order
pub type MeasurementSink = Arc<dyn Fn(&Measurement, &MessageMetadata) + Send + Sync>;

#[derive(Debug)]
enum Command {
    BeginRound(RoundReason),
    ActivityTimeout(WatchdogTick),
    RestartDue { request_id: String },
}

enum Verdict {
    Pending,
    Unfulfilled,
    Satisfied {
        request_id: String,
        subscription: Option<SubscriptionId>,
    },
}

struct Run {
    commands: mpsc::UnboundedSender<Command>,
    watchdog: ActivityWatchdog,
    sink: MeasurementSink,
    task: JoinHandle<()>,
    subscription: Option<SubscriptionId>,
}

struct Inner {
    state: RecoveryState,
    tracker: ProgressTracker,
    request_id: Option<String>,
    rounds: u64,
    /// Start delay or restart back-off; at most one is pending
    timer: Option<JoinHandle<()>>,
    round_timer: Option<RoundTimer>,
    run: Option<Run>,
}

impl Inner {
    fn is_current(&self, request_id: &str) -> bool {
        self.state == RecoveryState::InRound && self.request_id.as_deref() == Some(request_id)
    }

    fn watchdog(&self) -> Option<&ActivityWatchdog> {
        self.run.as_ref().map(|run| &run.watchdog)
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn schedule(&mut self, delay: std::time::Duration, command: Command) {
        self.cancel_timer();
        let Some(commands) = self.run.as_ref().map(|run| run.commands.clone()) else {
            return;
        };
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(command);
        }));
    }
}

pub struct RecoveryOrchestrator {
    bus: Arc<dyn PubSub>,
    topics: Topics,
    config: RecoveryConfig,
    inner: Mutex<Inner>,
    lifecycle: tokio::sync::Mutex<()>,
    events: broadcast::Sender<RecoveryEvent>,
}

impl RecoveryOrchestrator {
    pub fn new(bus: Arc<dyn PubSub>, topics: Topics, config: RecoveryConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            bus,
            topics,
            inner: Mutex::new(Inner {
                state: RecoveryState::Idle,
                tracker: ProgressTracker::new(config.known_brokers.clone()),
                request_id: None,
                rounds: 0,
                timer: None,
                round_timer: None,
                run: None,
            }),
            config,
            lifecycle: tokio::sync::Mutex::new(()),
            events,
        })
    }

    /// Subscribe to the recovery topic and schedule the first round after
    /// the peer formation delay.
    ///
    /// No-op when already running or satisfied.
    pub async fn start<F>(self: &Arc<Self>, on_measurement: F) -> RecoveryResult<()>
    where
        F: Fn(&Measurement, &MessageMetadata) + Send + Sync + 'static,
    {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let inner = self.inner.lock();
            if inner.run.is_some() || inner.state.is_terminal() {
                return Ok(());
            }
        }

        let mut subscription = self.bus.subscribe(&self.topics.recovery).await?;
        let subscription_id = subscription.id;

        let (commands, mut command_rx) = mpsc::unbounded_channel();
        let tick_tx = commands.clone();
        let watchdog = ActivityWatchdog::new(self.config.activity_timeout, move |tick| {
            let _ = tick_tx.send(Command::ActivityTimeout(tick));
        });

        let weak = Arc::downgrade(self);
        let mut inner = self.inner.lock();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    envelope = subscription.recv() => {
                        let Some(envelope) = envelope else { break };
                        let Some(this) = weak.upgrade() else { break };
                        if this.on_recovery_message(envelope).await.is_break() {
                            break;
                        }
                    }
                    command = command_rx.recv() => {
                        let Some(command) = command else { break };
                        let Some(this) = weak.upgrade() else { break };
                        this.on_command(command).await;
                    }
                }
            }
        });

        inner.run = Some(Run {
            commands,
            watchdog,
            sink: Arc::new(on_measurement),
            task,
            subscription: Some(subscription_id),
        });
        inner.state = RecoveryState::AwaitingPeerFormation;
        inner.schedule(
            self.config.start_delay,
            Command::BeginRound(RoundReason::Initial),
        );

        info!(
            consumer = %self.bus.publisher_id(),
            known_brokers = self.config.known_brokers.len(),
            start_delay_ms = self.config.start_delay.as_millis() as u64,
            "Recovery orchestrator started"
        );
        Ok(())
    }

    /// Disarm every timer and drop the subscription. Idempotent.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let run = {
            let mut inner = self.inner.lock();
            let Some(run) = inner.run.take() else {
                return;
            };
            run.watchdog.stop();
            inner.cancel_timer();
            inner.round_timer = None;
            if !inner.state.is_terminal() {
                inner.state = RecoveryState::Idle;
            }
            run
        };

        run.task.abort();
        if let Some(id) = run.subscription {
            if let Err(e) = self.bus.unsubscribe(id).await {
                warn!(error = %e, "Recovery unsubscribe failed");
            }
        }

        info!(consumer = %self.bus.publisher_id(), "Recovery orchestrator stopped");
    }

    pub fn state(&self) -> RecoveryState {
        self.inner.lock().state
    }

    /// Aggregate readiness over the known brokers
    pub fn progress(&self) -> AggregateProgress {
        self.inner.lock().tracker.aggregate()
    }

    pub fn broker_progress(&self, broker: &PublisherId) -> Option<BrokerProgress> {
        self.inner.lock().tracker.get(broker)
    }

    /// Identifier of the current (or last) round
    pub fn request_id(&self) -> Option<String> {
        self.inner.lock().request_id.clone()
    }

    /// Rounds started so far
    pub fn rounds(&self) -> u64 {
        self.inner.lock().rounds
    }

    /// True between `start` and either `stop` or satisfaction
    pub fn is_running(&self) -> bool {
        let inner = self.inner.lock();
        inner.run.is_some() && !inner.state.is_terminal()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RecoveryEvent> {
        self.events.subscribe()
    }

    async fn on_command(&self, command: Command) {
        match command {
            Command::BeginRound(reason) => {
                let ready = self.inner.lock().state == RecoveryState::AwaitingPeerFormation;
                if ready {
                    self.begin_round(reason).await;
                }
            }
            Command::ActivityTimeout(tick) => {
                let expired = {
                    let inner = self.inner.lock();
                    let accepted = inner.state == RecoveryState::InRound
                        && inner.watchdog().is_some_and(|w| w.accept(tick));
                    if accepted {
                        inner.request_id.clone()
                    } else {
                        None
                    }
                };

                if let Some(request_id) = expired {
                    warn!(
                        request_id = %request_id,
                        timeout_ms = self.config.activity_timeout.as_millis() as u64,
                        "No recovery activity, restarting round"
                    );
                    let _ = self.events.send(RecoveryEvent::ActivityTimeout { request_id });
                    self.begin_round(RoundReason::Timeout).await;
                }
            }
            Command::RestartDue { request_id } => {
                let due = {
                    let inner = self.inner.lock();
                    inner.state == RecoveryState::RoundRestarting
                        && inner.request_id.as_deref() == Some(request_id.as_str())
                };
                if due {
                    self.begin_round(RoundReason::ProtocolError).await;
                }
            }
        }
    }

    /// Issue a fresh request resuming from the low-water mark
    async fn begin_round(&self, reason: RoundReason) {
        let request = {
            let mut inner = self.inner.lock();
            if !inner.state.is_active() || inner.run.is_none() {
                return;
            }

            let from = inner.tracker.begin_round();
            let request_id = Uuid::new_v4().to_string();
            inner.request_id = Some(request_id.clone());
            inner.state = RecoveryState::InRound;
            inner.rounds += 1;
            inner.cancel_timer();
            inner.round_timer = Some(RoundTimer::start());
            if let Some(watchdog) = inner.watchdog() {
                watchdog.start();
            }

            RecoveryRequest {
                request_id,
                from,
                to: 0,
            }
        };

        recorder::record_round_started(reason.as_str());
        info!(
            request_id = %request.request_id,
            from = request.from,
            reason = %reason,
            "Recovery round started"
        );
        let _ = self.events.send(RecoveryEvent::RoundStarted {
            request_id: request.request_id.clone(),
            from: request.from,
            reason,
        });

        // The watchdog is armed, so a lost request becomes a timeout restart
        if let Err(e) = self.publish_request(&request).await {
            warn!(
                request_id = %request.request_id,
                error = %e,
                "Failed to publish recovery request"
            );
        }
    }

    async fn publish_request(&self, request: &RecoveryRequest) -> RecoveryResult<()> {
        let bytes = protocol::encode(&SystemMessage::from(request.clone()))?;
        self.bus.publish(&self.topics.system, bytes).await?;
        Ok(())
    }

    async fn on_recovery_message(&self, envelope: Envelope) -> ControlFlow<()> {
        let message = match protocol::decode(&envelope.content) {
            Ok(message) => message,
            Err(e) => {
                debug!(
                    publisher_id = %envelope.metadata.publisher_id,
                    error = %e,
                    "Ignoring undecodable recovery message"
                );
                return ControlFlow::Continue(());
            }
        };

        let Some(request_id) = message.recovery_request_id() else {
            return ControlFlow::Continue(());
        };
        if !self.inner.lock().is_current(request_id) {
            debug!(request_id = %request_id, "Ignoring reply from another round");
            return ControlFlow::Continue(());
        }

        match message {
            SystemMessage::RecoveryResponse(response) => {
                self.on_response(response, &envelope.metadata);
                ControlFlow::Continue(())
            }
            SystemMessage::RecoveryComplete(complete) => {
                self.on_complete(complete, &envelope.metadata).await
            }
            _ => ControlFlow::Continue(()),
        }
    }

    fn on_response(&self, response: RecoveryResponse, metadata: &MessageMetadata) {
        let sink = {
            let mut inner = self.inner.lock();
            if !inner.is_current(&response.request_id) {
                return;
            }

            let newest = response.payload.last().map(|record| record.timestamp());
            if let Err(e) =
                inner
                    .tracker
                    .apply_response(&metadata.publisher_id, response.seq_num, newest)
            {
                self.fail_round(&mut inner, e);
                return;
            }

            if let Some(watchdog) = inner.watchdog() {
                watchdog.update();
            }
            inner.run.as_ref().map(|run| run.sink.clone())
        };

        let Some(sink) = sink else {
            return;
        };
        for record in &response.payload {
            sink(&record.message, &record.metadata);
        }

        recorder::record_recovered(response.payload.len());
        debug!(
            request_id = %response.request_id,
            broker = %metadata.publisher_id,
            seq_num = response.seq_num,
            records = response.payload.len(),
            "Recovery page delivered"
        );
    }

    async fn on_complete(
        &self,
        complete: RecoveryComplete,
        metadata: &MessageMetadata,
    ) -> ControlFlow<()> {
        let verdict = {
            let mut inner = self.inner.lock();
            if !inner.is_current(&complete.request_id) {
                return ControlFlow::Continue(());
            }

            match inner.tracker.apply_complete(
                &metadata.publisher_id,
                complete.seq_num,
                complete.is_fulfilled,
                metadata.timestamp,
            ) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        request_id = %complete.request_id,
                        broker = %metadata.publisher_id,
                        "Ignoring redelivered completion"
                    );
                    return ControlFlow::Continue(());
                }
                Err(e) => {
                    self.fail_round(&mut inner, e);
                    return ControlFlow::Continue(());
                }
            }

            if let Some(watchdog) = inner.watchdog() {
                watchdog.update();
            }

            let aggregate = inner.tracker.aggregate();
            debug!(
                request_id = %complete.request_id,
                broker = %metadata.publisher_id,
                fulfilled = complete.is_fulfilled,
                reported = aggregate.reported,
                tracked = aggregate.tracked,
                "Broker completed round"
            );

            if aggregate.is_satisfied() {
                inner.state = RecoveryState::Satisfied;
                if let Some(watchdog) = inner.watchdog() {
                    watchdog.stop();
                }
                inner.cancel_timer();
                if let Some(timer) = inner.round_timer.take() {
                    timer.stop();
                }
                Verdict::Satisfied {
                    request_id: complete.request_id.clone(),
                    subscription: inner.run.as_mut().and_then(|run| run.subscription.take()),
                }
            } else if aggregate.is_complete {
                if let Some(timer) = inner.round_timer.take() {
                    timer.stop();
                }
                Verdict::Unfulfilled
            } else {
                Verdict::Pending
            }
        };

        match verdict {
            Verdict::Pending => ControlFlow::Continue(()),
            Verdict::Unfulfilled => {
                info!(
                    request_id = %complete.request_id,
                    "All brokers completed, history remains; starting another round"
                );
                self.begin_round(RoundReason::Unfulfilled).await;
                ControlFlow::Continue(())
            }
            Verdict::Satisfied {
                request_id,
                subscription,
            } => {
                if let Some(id) = subscription {
                    if let Err(e) = self.bus.unsubscribe(id).await {
                        warn!(error = %e, "Recovery unsubscribe failed");
                    }
                }
                recorder::record_satisfied();
                info!(request_id = %request_id, "Recovery satisfied");
                let _ = self.events.send(RecoveryEvent::Satisfied { request_id });
                ControlFlow::Break(())
            }
        }
    }

    /// Abandon the current round and schedule a single delayed restart.
    ///
    /// Later failures in the same round never get here: the state leaves
    /// `InRound`, so the rest of the round's messages are discarded.
    fn fail_round(&self, inner: &mut Inner, error: RecoveryError) {
        let Some(request_id) = inner.request_id.clone() else {
            return;
        };

        warn!(
            request_id = %request_id,
            error = %error,
            restart_in_ms = self.config.restart_delay.as_millis() as u64,
            "Recovery round failed"
        );

        inner.state = RecoveryState::RoundRestarting;
        if let Some(watchdog) = inner.watchdog() {
            watchdog.stop();
        }
        inner.round_timer = None;
        inner.schedule(
            self.config.restart_delay,
            Command::RestartDue {
                request_id: request_id.clone(),
            },
        );

        let _ = self.events.send(RecoveryEvent::RoundFailed {
            request_id,
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryBus;
    use std::time::Duration;

    fn config() -> RecoveryConfig {
        RecoveryConfig {
            known_brokers: vec!["broker-a".into()],
            start_delay: Duration::from_secs(5),
            restart_delay: Duration::from_secs(30),
            activity_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_peer_formation() {
        let bus = MemoryBus::new();
        let topics = Topics::default();
        let orchestrator =
            RecoveryOrchestrator::new(Arc::new(bus.client("consumer")), topics, config());
        assert_eq!(orchestrator.state(), RecoveryState::Idle);

        orchestrator.start(|_, _| {}).await.unwrap();
        assert_eq!(orchestrator.state(), RecoveryState::AwaitingPeerFormation);
        assert!(orchestrator.request_id().is_none());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(orchestrator.state(), RecoveryState::InRound);
        assert_eq!(orchestrator.rounds(), 1);
        assert!(orchestrator.request_id().is_some());

        orchestrator.stop().await;
        assert_eq!(orchestrator.state(), RecoveryState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_restarts_with_new_id() {
        let bus = MemoryBus::new();
        let orchestrator =
            RecoveryOrchestrator::new(Arc::new(bus.client("consumer")), Topics::default(), config());
        orchestrator.start(|_, _| {}).await.unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        let first = orchestrator.request_id().unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        let second = orchestrator.request_id().unwrap();
        assert_ne!(first, second);
        assert_eq!(orchestrator.rounds(), 2);
        assert_eq!(orchestrator.state(), RecoveryState::InRound);

        orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_round_cancels_it() {
        let bus = MemoryBus::new();
        let orchestrator =
            RecoveryOrchestrator::new(Arc::new(bus.client("consumer")), Topics::default(), config());
        orchestrator.start(|_, _| {}).await.unwrap();
        orchestrator.stop().await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(orchestrator.rounds(), 0);
        assert_eq!(orchestrator.state(), RecoveryState::Idle);
        assert!(!orchestrator.is_running());
    }
}
