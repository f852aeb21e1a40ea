use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Naive datetime layout the vendor API uses for query windows.
pub const VENDOR_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Format a date as a `YYYY-MM-DD` key.
pub fn date_key(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// Parse a `YYYY-MM-DD` key.
pub fn parse_date_key(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// The UTC calendar day before `now`.
pub fn previous_utc_day(now: DateTime<Utc>) -> NaiveDate {
    (now - Duration::days(1)).date_naive()
}

/// `t` plus `secs` seconds, or `None` when either is out of range.
pub fn checked_add_secs(t: DateTime<Utc>, secs: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(secs).and_then(|d| t.checked_add_signed(d))
}

/// Midnight at the start of `d`.
pub fn start_of_day(d: NaiveDate) -> NaiveDateTime {
    d.and_time(NaiveTime::MIN)
}

/// Parse a wall-clock timestamp as sent by CGM vendors.
///
/// Accepts naive ISO-8601 (with or without fractional seconds) and RFC 3339
/// with an offset; an offset is dropped in favor of the local wall-clock time.
pub fn parse_local_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok()
}

/// Human-readable date, e.g. `January 12, 2025`.
pub fn long_date(d: NaiveDate) -> String {
    d.format("%B %d, %Y").to_string()
}

/// Round to one decimal place, half away from zero.
pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
