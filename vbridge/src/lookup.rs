use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};

use vbridge_conf::identity::{to_json_pointer, Identity as IdentityConfig, Req};

use crate::identity::{ProfileLookup, VehicleIdentity};
use crate::{Error, Result};

/// Profile lookup over HTTP.
///
/// GET requests carry the params as query string, POST requests as a JSON
/// or form body depending on the configured content type.
pub struct HttpProfileLookup {
    client: Client,
    req: Req,
    timeout: Duration,
    vehicle_id_pointer: String,
    device_type_pointer: Option<String>,
}

impl HttpProfileLookup {
    pub fn new(cfg: &IdentityConfig) -> Result<Self> {
        let req = cfg.http_req.clone().ok_or_else(|| Error::from("identity.http_req is not configured"))?;
        let client = Client::builder()
            .connect_timeout(cfg.http_timeout)
            .timeout(cfg.http_timeout)
            .build()
            .map_err(|e| Error::Msg(format!("http client build error, {e}")))?;
        Ok(Self {
            client,
            req,
            timeout: cfg.http_timeout,
            vehicle_id_pointer: to_json_pointer(&cfg.vehicle_id_path),
            device_type_pointer: cfg.device_type_path.as_deref().map(to_json_pointer),
        })
    }

    async fn identity_from(&self, device_id: &str, resp: Response) -> Result<VehicleIdentity> {
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Msg(format!("profile lookup of {device_id} returned {status}")));
        }
        let body = resp.bytes().await?;
        let body: serde_json::Value = serde_json::from_slice(&body)?;
        log::trace!("{} profile body: {}", device_id, body);

        let vehicle_id = field_as_string(&body, &self.vehicle_id_pointer).ok_or_else(|| {
            Error::Msg(format!("profile of {device_id} has no vehicle id at {}", self.vehicle_id_pointer))
        })?;
        let device_type = self.device_type_pointer.as_deref().and_then(|p| field_as_string(&body, p));
        VehicleIdentity::new(vehicle_id, device_type)
    }
}

#[async_trait]
impl ProfileLookup for HttpProfileLookup {
    async fn lookup(&self, device_id: &str) -> Result<VehicleIdentity> {
        let params = self.req.params_for(device_id);
        log::debug!("profile lookup, method: {}, url: {}, device: {}", self.req.method, self.req.url, device_id);
        let builder = self
            .client
            .request(self.req.method.clone(), self.req.url.clone())
            .headers(self.req.headers().clone())
            .timeout(self.timeout);
        let builder = if self.req.is_get() {
            builder.query(&params)
        } else if self.req.json_body() {
            builder.json(&params)
        } else {
            builder.form(&params)
        };
        let resp = builder.send().await.map_err(|e| {
            log::debug!("{} profile lookup error: {:?}", device_id, e);
            Error::Msg(format!("profile lookup of {device_id} failed, {e}"))
        })?;
        self.identity_from(device_id, resp).await
    }
}

/// Non-empty string or number at `pointer`.
#[inline]
fn field_as_string(body: &serde_json::Value, pointer: &str) -> Option<String> {
    match body.pointer(pointer)? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
