use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::de::{self, Deserializer};
use serde::Deserialize;

use vbridge_utils::deserialize_duration;

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

/// Placeholder in request params that is replaced by the device identifier.
pub const DEVICE_ID_PLACEHOLDER: &str = "%d";

#[derive(Debug, Clone, Deserialize)]
pub struct Identity {
    ///Device identifiers containing this text are already vehicle identities, ignored when empty
    #[serde(default = "Identity::portal_prefix_default")]
    pub portal_prefix: String,

    #[serde(default = "Identity::http_timeout_default", deserialize_with = "deserialize_duration")]
    pub http_timeout: Duration,

    ///Retries after the first failed lookup, 2 => 3 attempts in total
    #[serde(default = "Identity::max_retries_default")]
    pub max_retries: usize,
    #[serde(default = "Identity::retry_interval_default", deserialize_with = "deserialize_duration")]
    pub retry_interval: Duration,

    ///Dotted path of the vehicle id in the lookup response body, e.g. "data.vehicleId"
    #[serde(default = "Identity::vehicle_id_path_default")]
    pub vehicle_id_path: String,
    #[serde(default)]
    pub device_type_path: Option<String>,

    #[serde(default)]
    pub http_req: Option<Req>,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            portal_prefix: Self::portal_prefix_default(),
            http_timeout: Self::http_timeout_default(),
            max_retries: Self::max_retries_default(),
            retry_interval: Self::retry_interval_default(),
            vehicle_id_path: Self::vehicle_id_path_default(),
            device_type_path: None,
            http_req: None,
        }
    }
}

impl Identity {
    fn portal_prefix_default() -> String {
        "portal".into()
    }
    fn http_timeout_default() -> Duration {
        Duration::from_secs(5)
    }
    fn max_retries_default() -> usize {
        2
    }
    fn retry_interval_default() -> Duration {
        Duration::from_millis(10)
    }
    fn vehicle_id_path_default() -> String {
        "vehicleId".into()
    }
}

/// Turn a dotted field path ("data.vehicle.id") into a JSON pointer ("/data/vehicle/id").
#[inline]
pub fn to_json_pointer(path: &str) -> String {
    if path.starts_with('/') {
        return path.to_owned();
    }
    path.split('.')
        .filter(|p| !p.is_empty())
        .map(|p| p.replace('~', "~0").replace('/', "~1"))
        .fold(String::new(), |mut acc, p| {
            acc.push('/');
            acc.push_str(&p);
            acc
        })
}

/// Body encoding of POST lookups, taken from the configured `content-type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    Form,
}

/// Extra request headers. `content-type` is pulled out, reqwest sets it per body kind.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "HashMap<String, String>")]
pub struct Headers {
    content_type: Option<ContentType>,
    map: HeaderMap,
}

impl TryFrom<HashMap<String, String>> for Headers {
    type Error = String;

    fn try_from(raw: HashMap<String, String>) -> Result<Self, Self::Error> {
        let mut headers = Headers::default();
        for (name, value) in raw {
            if name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
                headers.content_type = if value.contains("json") {
                    Some(ContentType::Json)
                } else if value.contains("x-www-form-urlencoded") {
                    Some(ContentType::Form)
                } else {
                    None
                };
                continue;
            }
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| format!("header '{name}': {e}"))?;
            let value = HeaderValue::from_str(&value).map_err(|e| format!("header '{name}': {e}"))?;
            headers.map.insert(name, value);
        }
        Ok(headers)
    }
}

/// The profile lookup request.
#[derive(Debug, Clone, Deserialize)]
pub struct Req {
    #[serde(deserialize_with = "Req::deserialize_url")]
    pub url: Url,
    #[serde(default = "Req::method_default", deserialize_with = "Req::deserialize_method")]
    pub method: Method,
    #[serde(default)]
    pub headers: Headers,
    ///Values may contain "%d", replaced by the device identifier
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl Req {
    #[inline]
    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers.map
    }

    /// POST bodies are JSON only when the content type says so, form encoded otherwise.
    #[inline]
    pub fn json_body(&self) -> bool {
        self.headers.content_type == Some(ContentType::Json)
    }

    /// Request params with the device identifier substituted.
    #[inline]
    pub fn params_for(&self, device_id: &str) -> HashMap<String, String> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), v.replace(DEVICE_ID_PLACEHOLDER, device_id)))
            .collect()
    }

    fn method_default() -> Method {
        Method::GET
    }

    fn deserialize_url<'de, D>(deserializer: D) -> std::result::Result<Url, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?.trim().parse::<Url>().map_err(de::Error::custom)
    }

    fn deserialize_method<'de, D>(deserializer: D) -> std::result::Result<Method, D::Error>
    where
        D: Deserializer<'de>,
    {
        let method = String::deserialize(deserializer)?;
        if method.eq_ignore_ascii_case("get") {
            Ok(Method::GET)
        } else if method.eq_ignore_ascii_case("post") {
            Ok(Method::POST)
        } else {
            Err(de::Error::custom(format!("unsupported lookup method '{method}', expected GET or POST")))
        }
    }
}
