#![deny(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use anyhow::Result;
use config::{Config, File, FileFormat};
use serde::Deserialize;

use self::delivery::Delivery;
use self::identity::Identity;
use self::logging::Log;
use self::pipeline::Pipeline;

pub mod delivery;
pub mod identity;
pub mod logging;
pub mod pipeline;

/// Loaded configuration, cheap to clone and shared by handle.
#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub task: Task,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub identity: Identity,
    #[serde(default)]
    pub delivery: Delivery,
    #[serde(default)]
    pub pipeline: Pipeline,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    /// Load from the default locations, an optional explicit file and `VBRIDGE_*` variables.
    ///
    /// Nested keys in the environment use a double underscore,
    /// e.g. `VBRIDGE_DELIVERY__SERVERS=kafka-1:9092`.
    pub fn new(cfg_name: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/vbridge/vbridge").required(false))
            .add_source(File::with_name("vbridge").required(false));

        if let Some(cfg) = cfg_name {
            builder = builder.add_source(File::with_name(cfg).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("vbridge").prefix_separator("_").separator("__").try_parsing(true),
        );

        let inner: Inner = builder.build()?.try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }

    /// Load from TOML text only.
    pub fn from_toml(text: &str) -> Result<Self> {
        let inner: Inner =
            Config::builder().add_source(File::from_str(text, FileFormat::Toml)).build()?.try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }

    #[inline]
    pub fn logs(&self) {
        log::debug!("Config info is {:?}", self.0);
        log::info!("exec_workers is {}", self.task.exec_workers);
        log::info!("exec_queue_max is {}", self.task.exec_queue_max);
        log::info!("delivery servers: {}, ack mode: {:?}", self.delivery.servers, self.delivery.ack_mode);
        log::info!("delivery tls enable: {}", self.delivery.tls.enable);
        log::info!(
            "identity lookup: {:?}, max_retries: {}, retry_interval: {:?}",
            self.identity.http_req.as_ref().map(|r| r.url.as_str()),
            self.identity.max_retries,
            self.identity.retry_interval
        );
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    //Concurrent background deliveries in async ack mode.
    #[serde(default = "Task::exec_workers_default")]
    pub exec_workers: usize,

    //Queue capacity of background deliveries.
    #[serde(default = "Task::exec_queue_max_default")]
    pub exec_queue_max: usize,
}

impl Default for Task {
    #[inline]
    fn default() -> Self {
        Self { exec_workers: Self::exec_workers_default(), exec_queue_max: Self::exec_queue_max_default() }
    }
}

impl Task {
    fn exec_workers_default() -> usize {
        128
    }
    fn exec_queue_max_default() -> usize {
        300_000
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::delivery::{AckMode, Partitioner};
    use super::logging::To;
    use super::pipeline::KeyBy;
    use super::*;

    #[test]
    fn defaults_without_sources() {
        let settings = Settings::from_toml("").expect("Settings creation failed");
        assert_eq!(settings.task.exec_workers, 128);
        assert_eq!(settings.log.to, To::Console);
        assert_eq!(settings.identity.max_retries, 2);
        assert_eq!(settings.identity.retry_interval, Duration::from_millis(10));
        assert_eq!(settings.identity.portal_prefix, "portal");
        assert!(settings.identity.http_req.is_none());
        assert_eq!(settings.delivery.ack_mode, AckMode::Async);
        assert_eq!(settings.delivery.partitioner, Partitioner::Murmur2Random);
        assert!(!settings.delivery.tls.enable);
        assert_eq!(settings.pipeline.key, KeyBy::DeviceId);
    }

    #[test]
    fn full_document() {
        let settings = Settings::from_toml(
            r#"
            [log]
            to = "both"
            level = "debug"
            dir = "/tmp/vbridge/"
            file = "bridge.log"

            [task]
            exec_workers = 8

            [identity]
            portal_prefix = "PORTAL"
            http_timeout = "2s"
            max_retries = 4
            retry_interval = "25ms"
            vehicle_id_path = "data.vehicleId"
            device_type_path = "data.deviceType"
            [identity.http_req]
            url = "http://127.0.0.1:9090/profile"
            method = "get"
            params = { deviceId = "%d" }

            [delivery]
            servers = "kafka-1:9092,kafka-2:9092"
            ack_mode = "sync"
            partitioner = "consistent"
            compression = true
            flush_timeout = "30s"
            properties = { "linger.ms" = "5" }
            [delivery.tls]
            enable = true
            keystore_location = "/etc/vbridge/client.p12"
            keystore_password = "secret"
            truststore_location = "/etc/vbridge/ca.pem"
            truststore_password = "changeit"

            [pipeline]
            topic = "vehicle-${local.topic}"
            key = "vehicle_id"
            "#,
        )
        .expect("Settings creation failed");

        assert_eq!(settings.log.path(), Some(std::path::PathBuf::from("/tmp/vbridge/bridge.log")));
        assert_eq!(settings.log.level.inner(), slog::Level::Debug);
        assert_eq!(settings.task.exec_workers, 8);
        assert_eq!(settings.task.exec_queue_max, 300_000);
        assert_eq!(settings.identity.max_retries, 4);
        assert_eq!(settings.identity.http_timeout, Duration::from_secs(2));
        assert_eq!(settings.identity.device_type_path.as_deref(), Some("data.deviceType"));
        assert!(settings.identity.http_req.as_ref().map(|r| r.is_get()).unwrap_or_default());
        assert_eq!(settings.delivery.ack_mode, AckMode::Sync);
        assert_eq!(settings.delivery.partitioner, Partitioner::Consistent);
        assert_eq!(settings.delivery.flush_timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.delivery.properties.get("linger.ms").map(|s| s.as_str()), Some("5"));
        assert!(settings.delivery.tls.missing().is_empty());
        assert_eq!(settings.pipeline.make_topic("cars/1"), "vehicle-cars-1");
    }

    #[test]
    fn environment_overrides_file() {
        let dir = std::env::temp_dir().join(format!("vbridge-conf-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("edge.toml");
        std::fs::write(
            &file,
            r#"
            [delivery]
            servers = "kafka-1:9092"
            ack_mode = "sync"
            "#,
        )
        .unwrap();

        std::env::set_var("VBRIDGE_DELIVERY__SERVERS", "kafka-9:9092,kafka-10:9092");
        std::env::set_var("VBRIDGE_IDENTITY__MAX_RETRIES", "5");
        let settings = Settings::new(file.to_str());
        std::env::remove_var("VBRIDGE_DELIVERY__SERVERS");
        std::env::remove_var("VBRIDGE_IDENTITY__MAX_RETRIES");
        let _ = std::fs::remove_dir_all(&dir);

        let settings = settings.unwrap();
        assert_eq!(settings.delivery.servers, "kafka-9:9092,kafka-10:9092");
        assert_eq!(settings.delivery.ack_mode, AckMode::Sync);
        assert_eq!(settings.identity.max_retries, 5);
    }

    #[test]
    fn unknown_partitioner_is_a_load_error() {
        let res = Settings::from_toml(
            r#"
            [delivery]
            partitioner = "com.example.CustomPartitioner"
            "#,
        );
        assert!(res.is_err());
    }
}
