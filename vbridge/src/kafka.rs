use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use rdkafka::config::{ClientConfig as KafkaClientConfig, RDKafkaLogLevel};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;

use vbridge_conf::delivery::Delivery as DeliveryConfig;
use vbridge_utils::timestamp_millis;

use crate::delivery::{AckFuture, DeliveryRecord, LogClient};
use crate::{Error, Result};

/// librdkafka configuration for `cfg`.
///
/// Fails with `MissingCredential` when TLS is enabled with incomplete materials.
pub fn client_config(cfg: &DeliveryConfig) -> Result<KafkaClientConfig> {
    let mut client_cfg = KafkaClientConfig::new();

    client_cfg.set("bootstrap.servers", cfg.servers.as_str());
    if let Some(client_id) = &cfg.client_id {
        log::info!("client: {}", client_id);
        client_cfg.set("client.id", client_id.as_str());
    }
    client_cfg.set("partitioner", cfg.partitioner.as_str());
    client_cfg.set("compression.type", if cfg.compression { "gzip" } else { "none" });

    let tls = &cfg.tls;
    if tls.enable {
        let missing = tls.missing();
        if !missing.is_empty() {
            return Err(Error::MissingCredential(missing));
        }
        client_cfg.set("security.protocol", "ssl");
        if let Some(ca) = &tls.truststore_location {
            client_cfg.set("ssl.ca.location", ca.as_str());
        }
        if tls.client_auth_required {
            if let (Some(location), Some(password)) = (&tls.keystore_location, &tls.keystore_password) {
                client_cfg.set("ssl.keystore.location", location.as_str());
                client_cfg.set("ssl.keystore.password", password.as_str());
            }
            if let Some(key_password) = tls.key_password.as_deref().filter(|p| !p.is_empty()) {
                client_cfg.set("ssl.key.password", key_password);
            }
        }
    }

    for (key, val) in &cfg.properties {
        if !key.trim_start().starts_with('#') {
            log::info!("{}={}", key, val);
            client_cfg.set(key, val);
        }
    }

    client_cfg.set_log_level(RDKafkaLogLevel::Info);
    Ok(client_cfg)
}

/// The single long-lived producer towards the brokers.
pub struct KafkaLogClient {
    producer: FutureProducer,
    queue_timeout: Duration,
}

impl KafkaLogClient {
    pub fn new(cfg: &DeliveryConfig) -> Result<Self> {
        let producer: FutureProducer =
            client_config(cfg)?.create().map_err(|e| Error::Msg(format!("kafka producer create error, {e}")))?;
        log::info!("kafka producer created, servers: {}", cfg.servers);
        Ok(Self { producer, queue_timeout: cfg.queue_timeout })
    }
}

const QUEUE_FULL_RETRY_DELAY: Duration = Duration::from_millis(100);

#[async_trait]
impl LogClient for KafkaLogClient {
    async fn enqueue(&self, record: &DeliveryRecord) -> Result<AckFuture> {
        let start = Instant::now();
        let mut frecord = FutureRecord::to(&record.topic)
            .key(record.key.as_ref())
            .payload(record.value.as_ref())
            .timestamp(timestamp_millis());
        loop {
            match self.producer.send_result(frecord) {
                Ok(delivery) => {
                    let key = record.key.clone();
                    return Ok(async move {
                        match delivery.await {
                            Ok(Ok(ack)) => Ok(ack),
                            Ok(Err((e, _msg))) => Err(Error::delivery(&key, e)),
                            Err(_) => Err(Error::delivery(&key, "producer dropped before acknowledgment")),
                        }
                    }
                    .boxed());
                }
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), r))
                    if start.elapsed() < self.queue_timeout =>
                {
                    frecord = r;
                    tokio::time::sleep(QUEUE_FULL_RETRY_DELAY).await;
                }
                Err((e, _)) => return Err(Error::delivery(&record.key, e)),
            }
        }
    }

    fn flush(&self, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.map(Timeout::After).unwrap_or(Timeout::Never);
        self.producer.flush(timeout).map_err(|e| Error::Msg(format!("kafka flush error, {e}")))
    }
}
