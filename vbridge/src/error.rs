use thiserror::Error;

use crate::decompress::CompressionKind;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed input, {0}")]
    MalformedInput(String),
    #[error("unsupported compression format {0:?}")]
    UnsupportedFormat(CompressionKind),
    #[error("corrupt {kind:?} payload, {reason}")]
    CorruptPayload { kind: CompressionKind, reason: String },
    #[error("deserialization error, {0}")]
    Deserialization(String),
    #[error("identity not found for device {device_id:?} after {attempts} attempt(s), {source}")]
    IdentityNotFound {
        device_id: String,
        attempts: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("missing TLS credential(s): {}", .0.join(", "))]
    MissingCredential(Vec<&'static str>),
    #[error("delivery failure, key: {key:?}, {reason}")]
    DeliveryFailure { key: String, reason: String },
    #[error("{0}")]
    Msg(String),
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    IoError(std::io::Error),
    #[error("{0}")]
    Json(serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Short, stable name of the variant, used as a metric label.
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MalformedInput(_) => "malformed_input",
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::CorruptPayload { .. } => "corrupt_payload",
            Error::Deserialization(_) => "deserialization",
            Error::IdentityNotFound { .. } => "identity_not_found",
            Error::MissingCredential(_) => "missing_credential",
            Error::DeliveryFailure { .. } => "delivery_failure",
            Error::Msg(_) | Error::Anyhow(_) | Error::IoError(_) | Error::Json(_) => "other",
        }
    }

    #[inline]
    pub(crate) fn delivery<K: AsRef<[u8]>, R: ToString>(key: K, reason: R) -> Self {
        Error::DeliveryFailure {
            key: String::from_utf8_lossy(key.as_ref()).into_owned(),
            reason: reason.to_string(),
        }
    }
}

impl From<String> for Error {
    #[inline]
    fn from(e: String) -> Self {
        Error::Msg(e)
    }
}

impl From<&str> for Error {
    #[inline]
    fn from(e: &str) -> Self {
        Error::Msg(e.to_string())
    }
}

impl From<anyhow::Error> for Error {
    #[inline]
    fn from(e: anyhow::Error) -> Self {
        Error::Anyhow(e)
    }
}

impl From<serde_json::Error> for Error {
    #[inline]
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

impl From<prometheus::Error> for Error {
    #[inline]
    fn from(e: prometheus::Error) -> Self {
        Error::Msg(format!("metrics error, {e}"))
    }
}

impl From<reqwest::Error> for Error {
    #[inline]
    fn from(e: reqwest::Error) -> Self {
        Error::Msg(e.to_string())
    }
}
