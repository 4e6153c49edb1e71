//! Delivery of encoded events to the append log.
//!
//! A [`DeliveryNode`] owns one long-lived [`LogClient`]. In `Sync` mode
//! `put` waits for the broker acknowledgment and surfaces failures. In
//! `Async` mode it returns once the record is enqueued and waits for the
//! acknowledgment on a bounded task queue, failures are then only logged and
//! counted. Either way records are enqueued in `put` order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use prometheus::HistogramTimer;
use rust_box::task_exec_queue::{Builder, SpawnExt, TaskExecQueue};
use serde_json::json;

use vbridge_conf::delivery::{AckMode, Delivery as DeliveryConfig};
use vbridge_conf::Task;
use vbridge_utils::Counter;

use crate::kafka::KafkaLogClient;
use crate::metrics::{DeliveryEvent, Metrics};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub key: Bytes,
    pub value: Bytes,
    pub topic: String,
}

/// Resolves with `(partition, offset)` once the broker acknowledged the record.
pub type AckFuture = BoxFuture<'static, Result<(i32, i64)>>;

/// Producer side of the append log.
#[async_trait]
pub trait LogClient: Send + Sync {
    /// Hand `record` to the producer queue.
    ///
    /// Records enqueued one after another are sent in that order.
    async fn enqueue(&self, record: &DeliveryRecord) -> Result<AckFuture>;

    /// Blocks until everything buffered is acknowledged, `None` waits without limit.
    fn flush(&self, timeout: Option<Duration>) -> Result<()>;
}

pub struct DeliveryNode {
    cfg: Arc<DeliveryConfig>,
    client: RwLock<Option<Arc<dyn LogClient>>>,
    exec: TaskExecQueue,
    inflight: Arc<Counter>,
    metrics: Arc<Metrics>,
}

impl DeliveryNode {
    /// Uninitialized node, `put` fails until [`DeliveryNode::init`] succeeds.
    ///
    /// Starts the background task queue, so it must be called within a tokio runtime.
    pub fn new(cfg: DeliveryConfig, task: &Task, metrics: Arc<Metrics>) -> Self {
        let (exec, task_runner) =
            Builder::default().workers(task.exec_workers).queue_max(task.exec_queue_max).build();

        tokio::spawn(async move {
            task_runner.await;
        });

        Self { cfg: Arc::new(cfg), client: RwLock::new(None), exec, inflight: Arc::new(Counter::new()), metrics }
    }

    /// Create the Kafka client. Calling it on an initialized node is a no-op.
    pub fn init(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }
        let client = KafkaLogClient::new(&self.cfg)?;
        self.init_with(Arc::new(client));
        Ok(())
    }

    /// Initialize with an already built client.
    pub fn init_with(&self, client: Arc<dyn LogClient>) {
        log::info!("delivery node ready, servers: {}, ack mode: {:?}", self.cfg.servers, self.cfg.ack_mode);
        *self.client.write() = Some(client);
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.client.read().is_some()
    }

    #[inline]
    pub fn ack_mode(&self) -> AckMode {
        self.cfg.ack_mode
    }

    /// Background deliveries not finished yet.
    #[inline]
    pub fn inflight(&self) -> &Counter {
        &self.inflight
    }

    pub async fn put(&self, key: Bytes, value: Bytes, topic: &str) -> Result<()> {
        let client = self
            .client
            .read()
            .clone()
            .ok_or_else(|| Error::delivery(&key, "delivery node is not initialized or already closed"))?;
        let record = DeliveryRecord { key, value, topic: topic.to_owned() };
        self.metrics.delivery_inc(DeliveryEvent::Submitted);

        if self.cfg.ack_mode == AckMode::Async {
            while self.exec.is_full() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }

        let timer = self.metrics.delivery_latency().start_timer();
        let ack = match client.enqueue(&record).await {
            Ok(ack) => ack,
            Err(e) => {
                timer.stop_and_discard();
                return Err(failed(&record, e, &self.metrics));
            }
        };

        match self.cfg.ack_mode {
            AckMode::Sync => acked(ack, timer, &record, &self.metrics).await,
            AckMode::Async => {
                self.inflight.inc();
                let inflight = self.inflight.clone();
                let metrics = self.metrics.clone();
                let key = record.key.clone();
                let spawned = async move {
                    let _ = acked(ack, timer, &record, &metrics).await;
                    inflight.dec();
                }
                .spawn(&self.exec)
                .await;
                if let Err(e) = spawned {
                    self.inflight.dec();
                    self.metrics.delivery_inc(DeliveryEvent::Failed);
                    log::error!(
                        "delivery failure, key: {:?}, exec task error, {}",
                        String::from_utf8_lossy(&key),
                        e.to_string()
                    );
                }
                Ok(())
            }
        }
    }

    /// Wait for background deliveries, then drain the client's buffer.
    ///
    /// Both steps together are bounded by `flush_timeout` when configured.
    pub async fn flush(&self) -> Result<()> {
        let timeout = self.cfg.flush_timeout;
        let deadline = timeout.map(|t| Instant::now() + t);
        let drained = async {
            while !self.inflight.is_zero() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        match timeout {
            Some(t) => tokio::time::timeout(t, drained).await.map_err(|_| {
                Error::Msg(format!("flush timeout, {} delivery(ies) still in flight", self.inflight.count()))
            })?,
            None => drained.await,
        }

        let client = match self.client.read().clone() {
            Some(client) => client,
            None => return Ok(()),
        };
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        tokio::task::spawn_blocking(move || client.flush(remaining))
            .await
            .map_err(|e| Error::Msg(format!("flush task error, {e}")))?
    }

    /// Release the client. Safe to call more than once.
    pub fn close(&self) {
        if self.client.write().take().is_some() {
            log::info!("delivery node closed, {} delivery(ies) still in flight", self.inflight.count());
        }
    }

    pub fn stats(&self) -> serde_json::Value {
        json!({
            "ready": self.is_ready(),
            "ack_mode": format!("{:?}", self.cfg.ack_mode),
            "inflight": self.inflight.to_json(),
            "task_exec_queue": {
                "active_count": self.exec.active_count(),
                "waiting_count": self.exec.waiting_count(),
            },
            "submitted": self.metrics.delivery_count(DeliveryEvent::Submitted),
            "acked": self.metrics.delivery_count(DeliveryEvent::Acked),
            "failed": self.metrics.delivery_count(DeliveryEvent::Failed),
        })
    }
}

async fn acked(ack: AckFuture, timer: HistogramTimer, record: &DeliveryRecord, metrics: &Metrics) -> Result<()> {
    match ack.await {
        Ok((partition, offset)) => {
            timer.observe_duration();
            metrics.delivery_inc(DeliveryEvent::Acked);
            log::debug!("delivered to {}[{}] at offset {}", record.topic, partition, offset);
            Ok(())
        }
        Err(e) => {
            timer.stop_and_discard();
            Err(failed(record, e, metrics))
        }
    }
}

fn failed(record: &DeliveryRecord, e: Error, metrics: &Metrics) -> Error {
    metrics.delivery_inc(DeliveryEvent::Failed);
    log::error!("delivery failure, key: {:?}, topic: {}, {}", String::from_utf8_lossy(&record.key), record.topic, e);
    match e {
        e @ Error::DeliveryFailure { .. } => e,
        e => Error::delivery(&record.key, e),
    }
}
