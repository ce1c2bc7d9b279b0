/// Timestamps in resource records are nanoseconds since the Unix epoch, as printed by `date +%s%N`.
use chrono::{DateTime, Utc};

pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Seconds elapsed since `origin`.  Negative if `ns` is before `origin`.  Epoch times in
/// nanoseconds do not fit an f64 mantissa, so the difference is taken first.

pub fn seconds_since(origin: u64, ns: u64) -> f64 {
    (ns as i128 - origin as i128) as f64 / NANOS_PER_SECOND as f64
}

/// Format as an ISO time with millisecond precision, or "-" if the value is not representable.

pub fn format_nanos(ns: u64) -> String {
    let secs = (ns / NANOS_PER_SECOND) as i64;
    let subsec = (ns % NANOS_PER_SECOND) as u32;
    match DateTime::<Utc>::from_timestamp(secs, subsec) {
        Some(t) => t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        None => "-".to_string(),
    }
}

#[test]
fn test_format_nanos() {
    assert!(format_nanos(0) == "1970-01-01T00:00:00.000Z");
    assert!(format_nanos(1_700_000_000_250_000_000) == "2023-11-14T22:13:20.250Z");
}

#[test]
fn test_seconds() {
    assert!(seconds_since(2_000_000_000, 1_000_000_000) == -1.0);
    assert!(seconds_since(1_709_287_200_000_000_001, 1_709_287_201_500_000_001) == 1.5);
}
