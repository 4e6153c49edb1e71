use serde::de::Deserializer;
use serde::Deserialize;

/// Placeholder in the target topic template, replaced by the inbound topic.
pub const LOCAL_TOPIC_PLACEHOLDER: &str = "${local.topic}";

type HasPattern = bool;

#[derive(Debug, Clone, Deserialize)]
pub struct Pipeline {
    #[serde(default = "Pipeline::topic_default", deserialize_with = "Pipeline::deserialize_topic")]
    pub topic: (String, HasPattern),
    #[serde(default)]
    pub key: KeyBy,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self { topic: Self::topic_default(), key: KeyBy::default() }
    }
}

impl Pipeline {
    fn topic_default() -> (String, HasPattern) {
        (LOCAL_TOPIC_PLACEHOLDER.into(), true)
    }

    /// Kafka topic for a message received on `local_topic`.
    ///
    /// Kafka topic names can't carry '/', so MQTT levels are joined with '-'.
    #[inline]
    pub fn make_topic(&self, local_topic: &str) -> String {
        let (topic, has_pattern) = &self.topic;
        if *has_pattern {
            topic.replace(LOCAL_TOPIC_PLACEHOLDER, local_topic.trim_matches('/').replace('/', "-").as_str())
        } else {
            topic.clone()
        }
    }

    fn deserialize_topic<'de, D>(deserializer: D) -> std::result::Result<(String, HasPattern), D::Error>
    where
        D: Deserializer<'de>,
    {
        let topic = String::deserialize(deserializer)?;
        let has_pattern = topic.contains(LOCAL_TOPIC_PLACEHOLDER);
        Ok((topic.replace('/', "-"), has_pattern))
    }
}

/// Which identifier becomes the record key, and so decides the partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyBy {
    #[default]
    DeviceId,
    VehicleId,
}
