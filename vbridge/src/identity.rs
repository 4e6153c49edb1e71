//! Device identifier to vehicle identity resolution.
//!
//! ```text
//! START -> fast path ------------------------------> SUCCESS
//!       -> LOOKUP -> ok ---------------------------> SUCCESS
//!                 -> err -> RETRY (after interval) -> LOOKUP
//!                 -> err, retries used up ---------> EXHAUSTED (IdentityNotFound)
//! ```
//!
//! Dropping the future returned by [`IdentityResolver::resolve`] cancels a
//! pending retry chain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;

use vbridge_conf::identity::Identity as IdentityConfig;

use crate::metrics::{IdentityEvent, Metrics};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleIdentity {
    vehicle_id: String,
    device_type: Option<String>,
}

impl VehicleIdentity {
    /// Fails on a blank vehicle id, there is no such thing as a default identity.
    #[inline]
    pub fn new<S: Into<String>>(vehicle_id: S, device_type: Option<String>) -> Result<Self> {
        let vehicle_id = vehicle_id.into();
        if vehicle_id.trim().is_empty() {
            return Err(Error::from("vehicle id is empty"));
        }
        Ok(Self { vehicle_id, device_type })
    }

    #[inline]
    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    #[inline]
    pub fn device_type(&self) -> Option<&str> {
        self.device_type.as_deref()
    }
}

/// Remote profile service that knows which vehicle a device belongs to.
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn lookup(&self, device_id: &str) -> Result<VehicleIdentity>;
}

/// Retry policy with a fixed delay and a bounded number of retries.
///
/// `max_retries` counts retries, not attempts: 2 retries make 3 attempts.
#[derive(Debug, Clone)]
pub struct FixedRetry {
    max_retries: usize,
    interval: Duration,
    retries: usize,
}

impl FixedRetry {
    #[inline]
    pub fn new(max_retries: usize, interval: Duration) -> Self {
        Self { max_retries, interval, retries: 0 }
    }

    #[inline]
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }
}

impl Backoff for FixedRetry {
    fn reset(&mut self) {
        self.retries = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries >= self.max_retries {
            None
        } else {
            self.retries += 1;
            Some(self.interval)
        }
    }
}

pub struct IdentityResolver {
    portal_prefix: String,
    retry: FixedRetry,
    lookup: Arc<dyn ProfileLookup>,
    metrics: Arc<Metrics>,
}

impl IdentityResolver {
    pub fn new(cfg: &IdentityConfig, lookup: Arc<dyn ProfileLookup>, metrics: Arc<Metrics>) -> Self {
        Self {
            portal_prefix: cfg.portal_prefix.clone(),
            retry: FixedRetry::new(cfg.max_retries, cfg.retry_interval),
            lookup,
            metrics,
        }
    }

    /// Replace the retry policy.
    #[inline]
    pub fn with_retry(mut self, retry: FixedRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Whether `device_id` already names a vehicle and needs no lookup.
    #[inline]
    pub fn is_self_identifying(&self, device_id: &str) -> bool {
        (!self.portal_prefix.is_empty() && device_id.contains(self.portal_prefix.as_str()))
            || device_id.contains('_')
            || device_id.contains('@')
    }

    pub async fn resolve(&self, device_id: &str) -> Result<VehicleIdentity> {
        let timer = self.metrics.identity_latency().start_timer();
        if self.is_self_identifying(device_id) {
            timer.observe_duration();
            self.metrics.identity_inc(IdentityEvent::FastPath);
            self.metrics.identity_inc(IdentityEvent::Success);
            log::debug!("{} is self-identifying, lookup skipped", device_id);
            return VehicleIdentity::new(device_id, None);
        }

        let mut attempts = 0;
        let res = backoff::future::retry_notify(
            self.retry.clone(),
            || {
                attempts += 1;
                self.metrics.identity_inc(IdentityEvent::Attempt);
                async move { self.lookup.lookup(device_id).await.map_err(backoff::Error::transient) }
            },
            |e: Error, delay: Duration| {
                self.metrics.identity_inc(IdentityEvent::Retry);
                log::debug!("{} identity lookup failed, retry in {:?}, {}", device_id, delay, e);
            },
        )
        .await;
        timer.observe_duration();

        match res {
            Ok(identity) => {
                self.metrics.identity_inc(IdentityEvent::Success);
                log::debug!("{} resolved to {} after {} attempt(s)", device_id, identity.vehicle_id(), attempts);
                Ok(identity)
            }
            Err(e) => {
                self.metrics.identity_inc(IdentityEvent::Failure);
                log::warn!("{} identity lookup exhausted after {} attempt(s), {}", device_id, attempts, e);
                Err(Error::IdentityNotFound { device_id: device_id.to_owned(), attempts, source: Box::new(e) })
            }
        }
    }
}
