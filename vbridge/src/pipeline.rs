use std::sync::Arc;

use bytes::Bytes;

use vbridge_conf::pipeline::{KeyBy, Pipeline as PipelineConfig};
use vbridge_conf::Settings;
use vbridge_utils::timestamp_millis;

use crate::codec::{self, Event};
use crate::decompress::decompress;
use crate::delivery::DeliveryNode;
use crate::identity::IdentityResolver;
use crate::lookup::HttpProfileLookup;
use crate::metrics::Metrics;
use crate::Result;

/// Per-message forwarding: decompress, resolve, encode, deliver.
///
/// One instance is shared by every worker. A failing stage aborts the
/// message and nothing is delivered for it.
pub struct ForwardingPipeline {
    cfg: PipelineConfig,
    resolver: IdentityResolver,
    node: DeliveryNode,
    metrics: Arc<Metrics>,
}

impl ForwardingPipeline {
    pub fn new(cfg: PipelineConfig, resolver: IdentityResolver, node: DeliveryNode, metrics: Arc<Metrics>) -> Self {
        Self { cfg, resolver, node, metrics }
    }

    /// Wire the HTTP profile lookup and the Kafka delivery node from `settings`.
    ///
    /// Fails on incomplete TLS materials or a missing lookup request config.
    /// Must be called within a tokio runtime.
    pub fn from_settings(settings: &Settings, metrics: Arc<Metrics>) -> Result<Self> {
        settings.logs();
        let lookup = Arc::new(HttpProfileLookup::new(&settings.identity)?);
        let resolver = IdentityResolver::new(&settings.identity, lookup, metrics.clone());
        let node = DeliveryNode::new(settings.delivery.clone(), &settings.task, metrics.clone());
        node.init()?;
        Ok(Self::new(settings.pipeline.clone(), resolver, node, metrics))
    }

    #[inline]
    pub fn node(&self) -> &DeliveryNode {
        &self.node
    }

    #[inline]
    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    #[inline]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub async fn process_message(&self, device_id: &str, raw_payload: Bytes, topic: &str) -> Result<()> {
        match self.forward(device_id, raw_payload, topic).await {
            Ok(()) => {
                self.metrics.message_inc("ok");
                Ok(())
            }
            Err(e) => {
                self.metrics.message_inc(e.kind());
                log::warn!("{} message on {} dropped, {}", device_id, topic, e);
                Err(e)
            }
        }
    }

    async fn forward(&self, device_id: &str, raw_payload: Bytes, topic: &str) -> Result<()> {
        let payload = decompress(raw_payload)?;
        let identity = self.resolver.resolve(device_id).await?;
        let event = Event::new(&identity, device_id, topic, payload, timestamp_millis());
        let value = codec::encode(&event)?;
        let key = match self.cfg.key {
            KeyBy::DeviceId => Bytes::copy_from_slice(device_id.as_bytes()),
            KeyBy::VehicleId => Bytes::copy_from_slice(identity.vehicle_id().as_bytes()),
        };
        let to = self.cfg.make_topic(topic);
        log::trace!("{} => {}, vehicle: {}, {} bytes", device_id, to, identity.vehicle_id(), value.len());
        self.node.put(key, value, &to).await
    }

    /// Drain pending deliveries and release the producer.
    pub async fn shutdown(&self) -> Result<()> {
        let res = self.node.flush().await;
        self.node.close();
        res
    }
}
