use chrono::{DateTime, Utc};

/// Convert a `Retry-After` header value into whole seconds.
///
/// Accepts delta-seconds (`"120"`) or an HTTP-date
/// (`"Wed, 21 Oct 2015 07:28:00 GMT"`). Dates are rounded up to the next
/// whole second and never yield less than 1. Anything unparseable, including
/// negative numbers, yields `None`.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if v.bytes().all(|b| b.is_ascii_digit()) {
        return v.parse::<u64>().ok();
    }
    if v.starts_with('-') || v.starts_with('+') {
        return None;
    }
    let at = DateTime::parse_from_rfc2822(v).ok()?.with_timezone(&Utc);
    let millis = (at - now).num_milliseconds();
    let secs = (millis + 999).div_euclid(1000);
    Some(secs.max(1) as u64)
}
