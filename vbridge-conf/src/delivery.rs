use std::time::Duration;

use serde::Deserialize;

use vbridge_utils::{deserialize_duration, deserialize_duration_option};

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

#[derive(Debug, Clone, Deserialize)]
pub struct Delivery {
    #[serde(default = "Delivery::servers_default")]
    pub servers: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub ack_mode: AckMode,
    #[serde(default)]
    pub partitioner: Partitioner,
    ///Producer-side batch compression
    #[serde(default)]
    pub compression: bool,
    ///How long a send may wait for room in the producer queue
    #[serde(default = "Delivery::queue_timeout_default", deserialize_with = "deserialize_duration")]
    pub queue_timeout: Duration,
    ///None waits until every buffered record is acknowledged
    #[serde(default, deserialize_with = "deserialize_duration_option")]
    pub flush_timeout: Option<Duration>,
    ///Raw librdkafka properties, applied last
    #[serde(default)]
    pub properties: HashMap<String, String>,
    #[serde(default)]
    pub tls: Tls,
}

impl Default for Delivery {
    fn default() -> Self {
        Self {
            servers: Self::servers_default(),
            client_id: None,
            ack_mode: AckMode::default(),
            partitioner: Partitioner::default(),
            compression: false,
            queue_timeout: Self::queue_timeout_default(),
            flush_timeout: None,
            properties: HashMap::default(),
            tls: Tls::default(),
        }
    }
}

impl Delivery {
    fn servers_default() -> String {
        "127.0.0.1:9092".into()
    }
    fn queue_timeout_default() -> Duration {
        Duration::ZERO
    }
}

/// When `put` reports back to its caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckMode {
    ///Return as soon as the record is queued, failures are only logged and counted
    #[default]
    Async,
    ///Wait for the broker acknowledgment and surface failures
    Sync,
}

/// Partitioning strategy of the producer, mapped onto librdkafka's `partitioner` property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partitioner {
    Random,
    Consistent,
    ConsistentRandom,
    Murmur2,
    ///Same key placement as the Java client's default partitioner
    #[default]
    Murmur2Random,
    Fnv1a,
    Fnv1aRandom,
}

impl Partitioner {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Partitioner::Random => "random",
            Partitioner::Consistent => "consistent",
            Partitioner::ConsistentRandom => "consistent_random",
            Partitioner::Murmur2 => "murmur2",
            Partitioner::Murmur2Random => "murmur2_random",
            Partitioner::Fnv1a => "fnv1a",
            Partitioner::Fnv1aRandom => "fnv1a_random",
        }
    }
}

/// Client-certificate TLS towards the brokers.
#[derive(Debug, Clone, Deserialize)]
pub struct Tls {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub keystore_location: Option<String>,
    #[serde(default)]
    pub keystore_password: Option<String>,
    #[serde(default)]
    pub truststore_location: Option<String>,
    #[serde(default)]
    pub truststore_password: Option<String>,
    #[serde(default)]
    pub key_password: Option<String>,
    #[serde(default = "Tls::client_auth_required_default")]
    pub client_auth_required: bool,
}

impl Default for Tls {
    fn default() -> Self {
        Self {
            enable: false,
            keystore_location: None,
            keystore_password: None,
            truststore_location: None,
            truststore_password: None,
            key_password: None,
            client_auth_required: Self::client_auth_required_default(),
        }
    }
}

impl Tls {
    fn client_auth_required_default() -> bool {
        true
    }

    /// Names of the TLS materials that are required but absent or blank.
    pub fn missing(&self) -> Vec<&'static str> {
        if !self.enable {
            return Vec::new();
        }
        [
            ("keystore_location", &self.keystore_location),
            ("keystore_password", &self.keystore_password),
            ("truststore_location", &self.truststore_location),
            ("truststore_password", &self.truststore_password),
        ]
        .into_iter()
        .filter(|(_, v)| v.as_deref().map(|v| v.trim().is_empty()).unwrap_or(true))
        .map(|(name, _)| name)
        .collect()
    }
}
