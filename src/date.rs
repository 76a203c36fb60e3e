//! Timestamp handling: the collection-window check applied to every raw record,
//! and the compact `YYYYMMDDHHMM` integer dates carried by canonical posts.

use serde_json::Value;
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

/// Outcome of checking a raw `createdAt` value against the collection window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validity {
    Accepted,
    /// Parsed, but the local calendar date is before the lower bound.
    TooEarly,
    /// A string that is not an ISO-8601 timestamp.
    Unparseable,
    /// Not something we can even attempt to parse (number, object, ...).
    Indeterminate,
}

impl Validity {
    #[inline]
    pub fn is_accepted(self) -> bool {
        matches!(self, Validity::Accepted)
    }
}

/// Parse an ISO-8601 timestamp the way the crawler dumps write them.
///
/// A trailing `Z` is read as `+00:00`. Timestamps without an offset are taken as UTC,
/// and a bare `YYYY-MM-DD` is midnight UTC. The returned value keeps the offset it was
/// written with, so calendar fields are the author's wall clock.
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut s = match raw.strip_suffix('Z').or_else(|| raw.strip_suffix('z')) {
        Some(head) => format!("{head}+00:00"),
        None => raw.to_string(),
    };
    // "2023-06-01 12:00:00" is accepted by most ISO readers; normalize the separator.
    if s.len() > 10 && s.as_bytes()[10] == b' ' {
        s.replace_range(10..11, "T");
    }

    if let Ok(dt) = OffsetDateTime::parse(&s, &Rfc3339) {
        return Some(dt);
    }
    if let Ok(dt) = OffsetDateTime::parse(&s, &Iso8601::DEFAULT) {
        return Some(dt);
    }
    if let Ok(dt) = PrimitiveDateTime::parse(&s, &Iso8601::DEFAULT) {
        return Some(dt.assume_utc());
    }
    Date::parse(&s, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|d| d.midnight().assume_utc())
}

/// Parse and check a timestamp string against `min_date` (inclusive). No upper bound.
pub fn accept_time(raw: &str, min_date: Date) -> Result<OffsetDateTime, Validity> {
    match parse_timestamp(raw) {
        Some(dt) if dt.date() < min_date => Err(Validity::TooEarly),
        Some(dt) => Ok(dt),
        None => Err(Validity::Unparseable),
    }
}

/// [`accept_time`] for a raw JSON value; anything but a string is indeterminate.
pub fn accept_time_value(v: &Value, min_date: Date) -> Result<OffsetDateTime, Validity> {
    match v.as_str() {
        Some(s) => accept_time(s, min_date),
        None => Err(Validity::Indeterminate),
    }
}

pub fn classify_time(raw: &str, min_date: Date) -> Validity {
    accept_time(raw, min_date).map_or_else(|v| v, |_| Validity::Accepted)
}

pub fn classify_time_value(v: &Value, min_date: Date) -> Validity {
    accept_time_value(v, min_date).map_or_else(|v| v, |_| Validity::Accepted)
}

/// Temporal Validator predicate.
#[inline]
pub fn valid_time(raw: &str, min_date: Date) -> bool {
    classify_time(raw, min_date).is_accepted()
}

/// `YYYYMMDDHHMM` in the timestamp's own offset.
pub fn compact_date(dt: OffsetDateTime) -> i64 {
    let year = dt.year() as i64;
    let month = u8::from(dt.month()) as i64;
    year * 100_000_000
        + month * 1_000_000
        + dt.day() as i64 * 10_000
        + dt.hour() as i64 * 100
        + dt.minute() as i64
}

/// Day prefix of a compact date for the per-kind edge lists; `00000000` when unknown.
pub fn day_string(date: Option<i64>) -> String {
    match date {
        Some(d) if d >= 0 => format!("{:08}", d / 10_000),
        _ => "00000000".to_string(),
    }
}
