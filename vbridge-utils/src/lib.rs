//! Small shared helpers for the vbridge crates.
//!
//! - [`Counter`]: atomic in-flight counter with a remembered peak
//! - Duration parsing from strings like `"10ms"`, `"5s"`, `"1h30m"`, with serde helpers
//! - Millisecond timestamps
//!
//! ```
//! use vbridge_utils::to_duration;
//!
//! assert_eq!(to_duration("1m30s").as_secs(), 90);
//! assert_eq!(to_duration("10ms").as_millis(), 10);
//! ```

#![deny(unsafe_code)]

use std::time::Duration;

use serde::{de::Deserializer, Deserialize};

mod counter;

pub use counter::Counter;

/// Milliseconds since the Unix epoch.
pub type TimestampMillis = i64;

/// Convert a human-readable duration string to a [`Duration`].
///
/// Units: `ms`, `s`, `m`, `h`, `d`, `w`. Segments are summed, unknown or
/// malformed segments count as zero.
///
/// ```
/// assert_eq!(vbridge_utils::to_duration("2h15m").as_secs(), 8100);
/// assert_eq!(vbridge_utils::to_duration("1s500ms").as_millis(), 1500);
/// assert_eq!(vbridge_utils::to_duration("").as_millis(), 0);
/// ```
pub fn to_duration(text: &str) -> Duration {
    let mut total: u64 = 0;
    let mut value: Option<u64> = None;
    let mut chars = text.trim().chars().map(|c| c.to_ascii_lowercase()).peekable();
    while let Some(c) = chars.next() {
        if let Some(d) = c.to_digit(10) {
            value = Some(value.unwrap_or(0).saturating_mul(10).saturating_add(u64::from(d)));
            continue;
        }
        if c.is_whitespace() {
            continue;
        }
        let unit = match c {
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                1
            }
            's' => 1_000,
            'm' => 60_000,
            'h' => 3_600_000,
            'd' => 86_400_000,
            'w' => 604_800_000,
            _ => 0,
        };
        if let Some(v) = value.take() {
            total = total.saturating_add(v.saturating_mul(unit));
        }
    }
    Duration::from_millis(total)
}

/// serde `deserialize_with` adapter over [`to_duration`].
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(|text| to_duration(&text))
}

/// Like [`deserialize_duration`], a blank string is `None`.
pub fn deserialize_duration_option<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    Ok(Some(text).filter(|t| !t.trim().is_empty()).map(|t| to_duration(&t)))
}

#[inline]
pub fn timestamp_millis() -> TimestampMillis {
    chrono::Utc::now().timestamp_millis()
}

/// Local time rendering of `t`, empty for non-positive or out of range input.
pub fn format_timestamp_millis(t: TimestampMillis) -> String {
    use chrono::TimeZone;
    match chrono::Local.timestamp_millis_opt(t) {
        chrono::LocalResult::Single(dt) if t > 0 => dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        _ => String::new(),
    }
}
