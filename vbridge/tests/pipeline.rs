use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::future::{self, FutureExt};
use parking_lot::Mutex;

use vbridge::conf::delivery::{AckMode, Delivery as DeliveryConfig};
use vbridge::conf::identity::Identity as IdentityConfig;
use vbridge::conf::pipeline::Pipeline as PipelineConfig;
use vbridge::conf::{Settings, Task};
use vbridge::metrics::DeliveryEvent;
use vbridge::{
    codec, AckFuture, DeliveryNode, DeliveryRecord, Error, FixedRetry, ForwardingPipeline, HttpProfileLookup,
    IdentityResolver, LogClient, Metrics, ProfileLookup, Result, VehicleIdentity,
};

const FRAME: &[u8] = br#"{"speed":88,"rpm":2400,"soc":0.71}"#;

struct CountingLookup {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingLookup {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), fail })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileLookup for CountingLookup {
    async fn lookup(&self, device_id: &str) -> Result<VehicleIdentity> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::from("profile service returned 503"));
        }
        VehicleIdentity::new(format!("VIN-{device_id}"), Some("tbox".into()))
    }
}

#[derive(Default)]
struct RecordingClient {
    records: Mutex<Vec<DeliveryRecord>>,
    fail: bool,
}

impl RecordingClient {
    fn records(&self) -> Vec<DeliveryRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl LogClient for RecordingClient {
    async fn enqueue(&self, record: &DeliveryRecord) -> Result<AckFuture> {
        let mut records = self.records.lock();
        records.push(record.clone());
        let ack = if self.fail {
            Err(Error::from("broker rejected the record"))
        } else {
            Ok((0, records.len() as i64 - 1))
        };
        Ok(future::ready(ack).boxed())
    }

    fn flush(&self, _timeout: Option<Duration>) -> Result<()> {
        Ok(())
    }
}

fn gzip(data: &[u8]) -> Bytes {
    let mut e = GzEncoder::new(Vec::new(), Compression::default());
    e.write_all(data).unwrap();
    Bytes::from(e.finish().unwrap())
}

fn pipeline(
    ack_mode: AckMode,
    cfg: PipelineConfig,
    lookup: Arc<CountingLookup>,
    client: Arc<RecordingClient>,
) -> ForwardingPipeline {
    let metrics = Arc::new(Metrics::new().unwrap());
    let resolver = IdentityResolver::new(&IdentityConfig::default(), lookup, metrics.clone())
        .with_retry(FixedRetry::new(2, Duration::from_millis(1)));
    let node = DeliveryNode::new(DeliveryConfig { ack_mode, ..Default::default() }, &Task::default(), metrics.clone());
    node.init_with(client);
    ForwardingPipeline::new(cfg, resolver, node, metrics)
}

#[tokio::test]
async fn gzip_message_is_forwarded() {
    let lookup = CountingLookup::new(false);
    let client = Arc::new(RecordingClient::default());
    let p = pipeline(AckMode::Sync, PipelineConfig::default(), lookup.clone(), client.clone());

    p.process_message("vehicle123", gzip(FRAME), "vehicles/telemetry").await.unwrap();

    assert_eq!(lookup.calls(), 1);
    let records = client.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.key.as_ref(), b"vehicle123");
    assert_eq!(record.topic, "vehicles-telemetry");
    assert!(codec::is_serialized(&record.value));

    let event = codec::decode(&record.value).unwrap();
    assert_eq!(event.vehicle_id, "VIN-vehicle123");
    assert_eq!(event.device_type.as_deref(), Some("tbox"));
    assert_eq!(event.device_id, "vehicle123");
    assert_eq!(event.topic, "vehicles/telemetry");
    assert_eq!(event.payload.as_ref(), FRAME);
    assert!(event.ts > 0);

    assert_eq!(p.metrics().message_count("ok"), 1);
    assert_eq!(p.metrics().delivery_count(DeliveryEvent::Acked), 1);
}

#[tokio::test]
async fn self_identifying_device_skips_lookup() {
    let lookup = CountingLookup::new(true);
    let client = Arc::new(RecordingClient::default());
    let p = pipeline(AckMode::Sync, PipelineConfig::default(), lookup.clone(), client.clone());

    p.process_message("LSVAU2180N_2183294", Bytes::from_static(FRAME), "vehicles/telemetry").await.unwrap();

    assert_eq!(lookup.calls(), 0);
    let event = codec::decode(&client.records()[0].value).unwrap();
    assert_eq!(event.vehicle_id, "LSVAU2180N_2183294");
    assert_eq!(event.device_type, None);
}

#[tokio::test]
async fn key_and_topic_follow_config() {
    let cfg: PipelineConfig = serde_json::from_str(r#"{"topic": "edge.${local.topic}", "key": "vehicle_id"}"#).unwrap();
    let client = Arc::new(RecordingClient::default());
    let p = pipeline(AckMode::Sync, cfg, CountingLookup::new(false), client.clone());

    p.process_message("vehicle123", gzip(FRAME), "/fleet/v1/can/").await.unwrap();

    let record = &client.records()[0];
    assert_eq!(record.key.as_ref(), b"VIN-vehicle123");
    assert_eq!(record.topic, "edge.fleet-v1-can");
}

#[tokio::test]
async fn corrupt_payload_aborts_before_lookup() {
    let lookup = CountingLookup::new(false);
    let client = Arc::new(RecordingClient::default());
    let p = pipeline(AckMode::Sync, PipelineConfig::default(), lookup.clone(), client.clone());

    let data = gzip(&FRAME.repeat(64));
    let truncated = data.slice(..data.len() / 2);
    let res = p.process_message("vehicle123", truncated, "vehicles/telemetry").await;
    assert!(matches!(res, Err(Error::CorruptPayload { .. })));

    let res = p.process_message("vehicle123", Bytes::from_static(b"BZh91AY"), "vehicles/telemetry").await;
    assert!(matches!(res, Err(Error::UnsupportedFormat(_))));

    let res = p.process_message("vehicle123", Bytes::from_static(b"{"), "vehicles/telemetry").await;
    assert!(matches!(res, Err(Error::MalformedInput(_))));

    assert_eq!(lookup.calls(), 0);
    assert!(client.records().is_empty());
    assert_eq!(p.metrics().message_count("corrupt_payload"), 1);
    assert_eq!(p.metrics().message_count("unsupported_format"), 1);
    assert_eq!(p.metrics().message_count("malformed_input"), 1);
}

#[tokio::test]
async fn unresolved_identity_delivers_nothing() {
    let lookup = CountingLookup::new(true);
    let client = Arc::new(RecordingClient::default());
    let p = pipeline(AckMode::Sync, PipelineConfig::default(), lookup.clone(), client.clone());

    match p.process_message("vehicle123", gzip(FRAME), "vehicles/telemetry").await {
        Err(Error::IdentityNotFound { device_id, attempts, .. }) => {
            assert_eq!(device_id, "vehicle123");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(lookup.calls(), 3);
    assert!(client.records().is_empty());
    assert_eq!(p.metrics().delivery_count(DeliveryEvent::Submitted), 0);
}

#[tokio::test]
async fn sync_delivery_failure_surfaces() {
    let client = Arc::new(RecordingClient { fail: true, ..Default::default() });
    let p = pipeline(AckMode::Sync, PipelineConfig::default(), CountingLookup::new(false), client);

    match p.process_message("vehicle123", gzip(FRAME), "vehicles/telemetry").await {
        Err(Error::DeliveryFailure { key, .. }) => assert_eq!(key, "vehicle123"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(p.metrics().message_count("delivery_failure"), 1);
}

#[tokio::test]
async fn async_delivery_failure_is_only_counted() {
    let client = Arc::new(RecordingClient { fail: true, ..Default::default() });
    let p = pipeline(AckMode::Async, PipelineConfig::default(), CountingLookup::new(false), client);

    p.process_message("vehicle123", gzip(FRAME), "vehicles/telemetry").await.unwrap();
    p.shutdown().await.unwrap();

    assert_eq!(p.metrics().message_count("ok"), 1);
    assert_eq!(p.metrics().delivery_count(DeliveryEvent::Failed), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_messages_share_one_node() {
    let client = Arc::new(RecordingClient::default());
    let p = Arc::new(pipeline(AckMode::Async, PipelineConfig::default(), CountingLookup::new(false), client.clone()));

    let tasks = (0..64)
        .map(|i| {
            let p = p.clone();
            tokio::spawn(async move { p.process_message(&format!("dev{i}"), gzip(FRAME), "vehicles/telemetry").await })
        })
        .collect::<Vec<_>>();
    for t in tasks {
        t.await.unwrap().unwrap();
    }
    p.shutdown().await.unwrap();

    let mut keys = client.records().into_iter().map(|r| r.key).collect::<Vec<_>>();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 64);
    assert!(p.node().inflight().is_zero());

    let res = p.process_message("dev0", gzip(FRAME), "vehicles/telemetry").await;
    assert!(matches!(res, Err(Error::DeliveryFailure { .. })));
}

#[tokio::test]
async fn http_lookup_from_settings() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/profile")
        .match_query(mockito::Matcher::UrlEncoded("device_id".into(), "vehicle123".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"code":0,"data":{"vehicleId":"LSVAU2180N2183294","deviceType":"tbox"}}"#)
        .expect(1)
        .create_async()
        .await;

    let settings = Settings::from_toml(&format!(
        r#"
        [identity]
        vehicle_id_path = "data.vehicleId"
        device_type_path = "data.deviceType"
        [identity.http_req]
        url = "{}/profile"
        params = {{ device_id = "%d" }}

        [delivery]
        ack_mode = "sync"
        "#,
        server.url()
    ))
    .unwrap();

    let metrics = Arc::new(Metrics::new().unwrap());
    let lookup = Arc::new(HttpProfileLookup::new(&settings.identity).unwrap());
    let resolver = IdentityResolver::new(&settings.identity, lookup, metrics.clone());
    let node = DeliveryNode::new(settings.delivery.clone(), &settings.task, metrics.clone());
    let client = Arc::new(RecordingClient::default());
    node.init_with(client.clone());
    let p = ForwardingPipeline::new(settings.pipeline.clone(), resolver, node, metrics);

    p.process_message("vehicle123", gzip(FRAME), "vehicles/telemetry").await.unwrap();

    mock.assert_async().await;
    let event = codec::decode(&client.records()[0].value).unwrap();
    assert_eq!(event.vehicle_id, "LSVAU2180N2183294");
    assert_eq!(event.device_type.as_deref(), Some("tbox"));
}

#[tokio::test]
async fn from_settings_rejects_incomplete_config() {
    let metrics = Arc::new(Metrics::new().unwrap());
    let settings = Settings::from_toml("").unwrap();
    assert!(ForwardingPipeline::from_settings(&settings, metrics).is_err());

    let settings = Settings::from_toml(
        r#"
        [identity.http_req]
        url = "http://127.0.0.1:9090/profile"

        [delivery.tls]
        enable = true
        keystore_location = "/etc/vbridge/client.p12"
        keystore_password = "secret"
        "#,
    )
    .unwrap();
    let metrics = Arc::new(Metrics::new().unwrap());
    match ForwardingPipeline::from_settings(&settings, metrics) {
        Err(Error::MissingCredential(missing)) => {
            assert_eq!(missing, vec!["truststore_location", "truststore_password"])
        }
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("pipeline started with partial TLS materials"),
    }
}
