//! Pipeline counters and latency histograms.
//!
//! Everything is registered against a caller-supplied [`Registry`], so a
//! process can expose them next to its own metrics and tests can observe
//! them without any global state.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

use crate::Result;

const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityEvent {
    FastPath,
    Attempt,
    Retry,
    Success,
    Failure,
}

impl IdentityEvent {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityEvent::FastPath => "fast_path",
            IdentityEvent::Attempt => "attempt",
            IdentityEvent::Retry => "retry",
            IdentityEvent::Success => "success",
            IdentityEvent::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryEvent {
    Submitted,
    Acked,
    Failed,
}

impl DeliveryEvent {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryEvent::Submitted => "submitted",
            DeliveryEvent::Acked => "acked",
            DeliveryEvent::Failed => "failed",
        }
    }
}

pub struct Metrics {
    reg: Registry,
    identity: IntCounterVec,
    identity_latency: Histogram,
    delivery: IntCounterVec,
    delivery_latency: Histogram,
    messages: IntCounterVec,
}

impl Metrics {
    /// Metrics on a private registry.
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(reg: Registry) -> Result<Self> {
        let identity = IntCounterVec::new(
            Opts::new("vbridge_identity_total", "Identity resolution events"),
            &["event"],
        )?;
        let identity_latency = Histogram::with_opts(
            HistogramOpts::new("vbridge_identity_seconds", "Identity resolution latency")
                .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let delivery =
            IntCounterVec::new(Opts::new("vbridge_delivery_total", "Append log delivery events"), &["event"])?;
        let delivery_latency = Histogram::with_opts(
            HistogramOpts::new("vbridge_delivery_seconds", "Append log acknowledgment latency")
                .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let messages = IntCounterVec::new(
            Opts::new("vbridge_messages_total", "Processed inbound messages by result"),
            &["result"],
        )?;

        reg.register(Box::new(identity.clone()))?;
        reg.register(Box::new(identity_latency.clone()))?;
        reg.register(Box::new(delivery.clone()))?;
        reg.register(Box::new(delivery_latency.clone()))?;
        reg.register(Box::new(messages.clone()))?;

        Ok(Self { reg, identity, identity_latency, delivery, delivery_latency, messages })
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.reg
    }

    #[inline]
    pub fn identity_inc(&self, e: IdentityEvent) {
        self.identity.with_label_values(&[e.as_str()]).inc();
    }

    #[inline]
    pub fn identity_count(&self, e: IdentityEvent) -> u64 {
        self.identity.with_label_values(&[e.as_str()]).get()
    }

    #[inline]
    pub fn identity_latency(&self) -> &Histogram {
        &self.identity_latency
    }

    #[inline]
    pub fn delivery_inc(&self, e: DeliveryEvent) {
        self.delivery.with_label_values(&[e.as_str()]).inc();
    }

    #[inline]
    pub fn delivery_count(&self, e: DeliveryEvent) -> u64 {
        self.delivery.with_label_values(&[e.as_str()]).get()
    }

    #[inline]
    pub fn delivery_latency(&self) -> &Histogram {
        &self.delivery_latency
    }

    /// `result` is "ok" or an error kind.
    #[inline]
    pub fn message_inc(&self, result: &str) {
        self.messages.with_label_values(&[result]).inc();
    }

    #[inline]
    pub fn message_count(&self, result: &str) -> u64 {
        self.messages.with_label_values(&[result]).get()
    }

    /// Prometheus text exposition of everything in the registry.
    #[inline]
    pub fn to_metrics(&self) -> Result<Vec<u8>> {
        let mut buffer = vec![];
        let encoder = TextEncoder::new();
        encoder.encode(&self.reg.gather(), &mut buffer)?;
        Ok(buffer)
    }
}
