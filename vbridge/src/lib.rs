#![deny(unsafe_code)]
//! Forwarding core of the vehicle telemetry bridge.
//!
//! Inbound device messages are decompressed, attributed to a vehicle,
//! re-encoded into the event wire format and appended to Kafka:
//!
//! ```text
//! process_message(device_id, payload, topic)
//!   -> decompress -> IdentityResolver::resolve -> codec::encode -> DeliveryNode::put
//! ```

pub use vbridge_conf as conf;
pub use vbridge_utils as utils;

pub use crate::codec::Event;
pub use crate::decompress::CompressionKind;
pub use crate::delivery::{AckFuture, DeliveryNode, DeliveryRecord, LogClient};
pub use crate::error::{Error, Result};
pub use crate::identity::{FixedRetry, IdentityResolver, ProfileLookup, VehicleIdentity};
pub use crate::kafka::KafkaLogClient;
pub use crate::lookup::HttpProfileLookup;
pub use crate::metrics::Metrics;
pub use crate::pipeline::ForwardingPipeline;

pub mod codec;
pub mod decompress;
pub mod delivery;
pub mod error;
pub mod identity;
pub mod kafka;
pub mod logger;
pub mod lookup;
pub mod metrics;
pub mod pipeline;
