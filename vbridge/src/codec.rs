//! Wire format of forwarded events: a 2-byte marker followed by the bincode
//! encoding of [`Event`].
//!
//! Consumers sniff the marker with [`is_serialized`] before committing to a
//! full [`decode`], so raw and encoded payloads can share a topic.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::decompress::magic;
use crate::identity::VehicleIdentity;
use crate::{Error, Result};

/// Leading marker of every encoded event, big-endian on the wire.
pub const EVENT_MAGIC: u16 = 0xbe01;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub vehicle_id: String,
    pub device_type: Option<String>,
    pub device_id: String,
    pub topic: String,
    pub payload: Bytes,
    pub ts: i64,
}

impl Event {
    #[inline]
    pub fn new(identity: &VehicleIdentity, device_id: &str, topic: &str, payload: Bytes, ts: i64) -> Self {
        Self {
            vehicle_id: identity.vehicle_id().to_owned(),
            device_type: identity.device_type().map(ToOwned::to_owned),
            device_id: device_id.to_owned(),
            topic: topic.to_owned(),
            payload,
            ts,
        }
    }
}

pub fn encode(event: &Event) -> Result<Bytes> {
    let size = bincode::serialized_size(event).map_err(|e| Error::Msg(format!("encode error, {e}")))?;
    let mut buf = BytesMut::with_capacity(2 + size as usize);
    buf.put_u16(EVENT_MAGIC);
    bincode::serialize_into((&mut buf).writer(), event).map_err(|e| Error::Msg(format!("encode error, {e}")))?;
    Ok(buf.freeze())
}

pub fn decode(data: &[u8]) -> Result<Event> {
    match magic(data) {
        Some(EVENT_MAGIC) => {}
        Some(m) => return Err(Error::Deserialization(format!("unexpected marker 0x{m:04x}"))),
        None => return Err(Error::Deserialization(format!("buffer too short, {} byte(s)", data.len()))),
    }
    bincode::deserialize::<Event>(&data[2..]).map_err(|e| Error::Deserialization(e.to_string()))
}

#[inline]
pub fn is_serialized(data: &[u8]) -> bool {
    magic(data) == Some(EVENT_MAGIC)
}
