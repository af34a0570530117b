//! Recovery replay
//!
//! The subscription task only decodes requests and hands them to a work
//! queue. A separate worker pages through the retention buffer, so a long
//! replay never stalls the subscription.

use crate::broker::error::BrokerResult;
use crate::broker::retention::SharedRetention;
use crate::broker::types::{BrokerCounters, ReplySummary, ResponderConfig};
use crate::metrics::recorder;
use crate::protocol::{self, RecoveryComplete, RecoveryRequest, RecoveryResponse, SystemMessage};
use crate::transport::{PubSub, SubscriptionId, Topics};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Running {
    subscription: SubscriptionId,
    listener: JoinHandle<()>,
    worker: JoinHandle<()>,
}

#[derive(Clone)]
struct ReplyContext {
    bus: Arc<dyn PubSub>,
    topics: Topics,
    retention: SharedRetention,
    config: ResponderConfig,
    counters: Arc<BrokerCounters>,
}

pub struct RecoveryResponder {
    ctx: ReplyContext,
    running: Mutex<Option<Running>>,
}

impl RecoveryResponder {
    pub(crate) fn new(
        bus: Arc<dyn PubSub>,
        topics: Topics,
        retention: SharedRetention,
        config: ResponderConfig,
        counters: Arc<BrokerCounters>,
    ) -> Self {
        Self {
            ctx: ReplyContext {
                bus,
                topics,
                retention,
                config,
                counters,
            },
            running: Mutex::new(None),
        }
    }

    /// Subscribe to recovery requests on the system topic
    pub async fn start(&self) -> BrokerResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let mut subscription = self.ctx.bus.subscribe(&self.ctx.topics.system).await?;
        let id = subscription.id;
        let (work_tx, mut work_rx) = mpsc::unbounded_channel::<RecoveryRequest>();

        let listener = tokio::spawn(async move {
            while let Some(envelope) = subscription.recv().await {
                match protocol::decode(&envelope.content) {
                    Ok(SystemMessage::RecoveryRequest(request)) => {
                        debug!(
                            request_id = %request.request_id,
                            publisher_id = %envelope.metadata.publisher_id,
                            "Queued recovery request"
                        );
                        if work_tx.send(request).is_err() {
                            break;
                        }
                    }
                    // Confirmations share the topic
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Undecodable system message"),
                }
            }
        });

        let ctx = self.ctx.clone();
        let worker = tokio::spawn(async move {
            while let Some(request) = work_rx.recv().await {
                if let Err(e) = ctx.answer(&request).await {
                    warn!(
                        request_id = %request.request_id,
                        error = %e,
                        "Recovery reply aborted"
                    );
                }
            }
        });

        *running = Some(Running {
            subscription: id,
            listener,
            worker,
        });

        info!(
            publisher_id = %self.ctx.bus.publisher_id(),
            page_size = self.ctx.config.page_size,
            max_pages = self.ctx.config.max_pages,
            "Recovery responder started"
        );
        Ok(())
    }

    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.listener.abort();
        running.worker.abort();
        if let Err(e) = self.ctx.bus.unsubscribe(running.subscription).await {
            warn!(error = %e, "Responder unsubscribe failed");
        }

        info!(publisher_id = %self.ctx.bus.publisher_id(), "Recovery responder stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Answer one request directly, bypassing the work queue
    pub async fn answer(&self, request: &RecoveryRequest) -> BrokerResult<ReplySummary> {
        self.ctx.answer(request).await
    }
}

impl ReplyContext {
    async fn answer(&self, request: &RecoveryRequest) -> BrokerResult<ReplySummary> {
        let records = self.retention.read().query(request.from, request.to);

        let page_size = self.config.page_size.max(1);
        let fulfilled = records.len() <= page_size.saturating_mul(self.config.max_pages);
        let total = records.len().div_ceil(page_size).min(self.config.max_pages);

        let mut pages = 0usize;
        let mut sent = 0usize;
        for page in records.chunks(page_size).take(self.config.max_pages) {
            let response = SystemMessage::from(RecoveryResponse {
                request_id: request.request_id.clone(),
                seq_num: pages as u64,
                payload: page.to_vec(),
            });
            self.publish(&response).await?;

            debug!(
                request_id = %request.request_id,
                seq_num = pages,
                records = page.len(),
                "Sent recovery page"
            );
            BrokerCounters::incr(&self.counters.pages_sent, 1);
            recorder::record_page_sent(page.len());

            pages += 1;
            sent += page.len();
            if pages < total {
                tokio::time::sleep(self.config.page_interval).await;
            }
        }

        let complete = SystemMessage::from(RecoveryComplete {
            request_id: request.request_id.clone(),
            seq_num: pages as u64,
            is_fulfilled: fulfilled,
        });
        self.publish(&complete).await?;

        BrokerCounters::incr(&self.counters.requests_served, 1);
        if !fulfilled {
            BrokerCounters::incr(&self.counters.replies_truncated, 1);
        }
        recorder::record_request_served(fulfilled);

        info!(
            request_id = %request.request_id,
            from = request.from,
            to = request.to,
            pages,
            records = sent,
            matched = records.len(),
            fulfilled,
            "Recovery request served"
        );

        Ok(ReplySummary {
            pages,
            records: sent,
            fulfilled,
        })
    }

    async fn publish(&self, message: &SystemMessage) -> BrokerResult<()> {
        let bytes = protocol::encode(message)?;
        self.bus.publish(&self.topics.recovery, bytes).await?;
        Ok(())
    }
}
