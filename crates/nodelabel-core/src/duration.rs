//! Go-style duration strings (`"60s"`, `"1m30s"`, `"500ms"`) for config
//! documents.
//!
//! Use with `#[serde(with = "crate::duration")]`.  Plain integers are read
//! as seconds.

use std::fmt;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};

/// Longest accepted duration, the same bound as Go's `time.Duration`.
pub const MAX: Duration = Duration::from_nanos(i64::MAX as u64);

/// Parse a duration string made of `<number><unit>` groups.
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`.  The bare string `"0"`
/// is accepted as zero.
pub fn parse(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut nanos = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {input:?}"))?;
        if number_end == 0 {
            return Err(format!("invalid duration {input:?}"));
        }
        let number: f64 = rest[..number_end]
            .parse()
            .map_err(|_| format!("invalid number in duration {input:?}"))?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            unit => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
        };
        nanos += number * scale;
        rest = &rest[unit_end..];
    }
    if nanos.round() > MAX.as_nanos() as f64 {
        return Err(format!("duration {input:?} out of range"));
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}

/// Render a duration the way [`parse`] reads it back.
pub fn format(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }
    let sub = duration.subsec_nanos();
    if sub != 0 {
        if duration.as_secs() > 0 {
            return format!("{}s", duration.as_secs_f64());
        }
        return if sub % 1_000_000 == 0 {
            format!("{}ms", sub / 1_000_000)
        } else if sub % 1_000 == 0 {
            format!("{}us", sub / 1_000)
        } else {
            format!("{sub}ns")
        };
    }

    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    out.push_str(&format!("{seconds}s"));
    out
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(*duration))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(DurationVisitor)
}

struct DurationVisitor;

impl Visitor<'_> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a duration string such as \"60s\" or a number of seconds")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
        let duration = Duration::from_secs(v);
        if duration > MAX {
            return Err(E::custom(format!("duration of {v} seconds out of range")));
        }
        Ok(duration)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
        let secs = u64::try_from(v).map_err(|_| E::custom(format!("negative duration {v}")))?;
        self.visit_u64(secs)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
        parse(v).map_err(E::custom)
    }
}
