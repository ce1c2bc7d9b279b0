/// Derived metrics over one resource time series, presentation units, and positional realignment
/// of per-slot sequences.
///
/// The metric functions are pure and never clamp: a negative delta (a counter reset, or memory
/// being freed) is passed through as is so that callers can see it.
use crate::error::{Error, Result};

use std::str::FromStr;

/// Usage since the first sample: `values[i] - values[0]`.

pub fn total(values: &[f64]) -> Vec<f64> {
    match values.first() {
        Some(first) => values.iter().map(|v| v - first).collect(),
        None => vec![],
    }
}

/// Change per interval: 0 for the first sample, then `values[i] - values[i-1]`.

pub fn delta(values: &[f64]) -> Vec<f64> {
    let mut result = Vec::with_capacity(values.len());
    if !values.is_empty() {
        result.push(0.0);
    }
    for w in values.windows(2) {
        result.push(w[1] - w[0]);
    }
    result
}

/// Percentage of the interval spent, for cpu.  The values must already be in the unit of the
/// timestamps.  The first sample, and any interval of zero width, is 0.

pub fn percentage(values: &[f64], timestamps: &[f64]) -> Result<Vec<f64>> {
    if values.len() != timestamps.len() {
        return Err(Error::Query(format!(
            "{} values but {} timestamps",
            values.len(),
            timestamps.len()
        )));
    }
    let mut result = Vec::with_capacity(values.len());
    if !values.is_empty() {
        result.push(0.0);
    }
    for i in 1..values.len() {
        let dt = timestamps[i] - timestamps[i - 1];
        result.push(if dt == 0.0 {
            0.0
        } else {
            (values[i] - values[i - 1]) / dt * 100.0
        });
    }
    Ok(result)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Unit {
    GB,
    MB,
    KB,
    #[default]
    Byte,
}

impl Unit {
    pub fn divisor(&self) -> f64 {
        match self {
            Unit::GB => 1024.0 * 1024.0 * 1024.0,
            Unit::MB => 1024.0 * 1024.0,
            Unit::KB => 1024.0,
            Unit::Byte => 1.0,
        }
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Unit, String> {
        match s {
            "GB" => Ok(Unit::GB),
            "MB" => Ok(Unit::MB),
            "KB" => Ok(Unit::KB),
            "Byte" | "B" => Ok(Unit::Byte),
            _ => Err(format!("Unknown unit '{s}', expected GB, MB, KB or Byte")),
        }
    }
}

/// Convert byte values to `unit`, for presentation only.

pub fn convert_units(values: &[f64], unit: Unit) -> Vec<f64> {
    if unit == Unit::Byte {
        return values.to_vec();
    }
    let d = unit.divisor();
    values.iter().map(|v| v / d).collect()
}

/// Insert a None at each failed cycle position so that element N-1 of the result belongs to cycle
/// N.  Positions are 1-based and are applied in ascending order; a position beyond the end of the
/// sequence appends.

pub fn realign<T: Clone>(values: &[T], failed_positions: &[u32]) -> Vec<Option<T>> {
    let mut result = values.iter().cloned().map(Some).collect::<Vec<Option<T>>>();
    let mut positions = failed_positions.to_vec();
    positions.sort_unstable();
    for pos in positions {
        let at = (pos.saturating_sub(1) as usize).min(result.len());
        result.insert(at, None);
    }
    result
}

#[cfg(test)]
use proptest::prelude::*;

#[test]
fn test_delta_negative() {
    assert!(delta(&[100.0, 100.0, 150.0, 140.0]) == vec![0.0, 0.0, 50.0, -10.0]);
    assert!(delta(&[]).is_empty());
    assert!(delta(&[7.0]) == vec![0.0]);
}

#[test]
fn test_total() {
    assert!(total(&[5.0, 7.0, 4.0]) == vec![0.0, 2.0, -1.0]);
    assert!(total(&[]).is_empty());
}

#[test]
fn test_percentage() {
    // 0.5s of cpu in a 1s interval, then 0.25s in 0.5s, then a zero-width interval.
    let p = percentage(&[0.0, 0.5, 0.75, 0.75], &[10.0, 11.0, 11.5, 11.5]).unwrap();
    assert!(p == vec![0.0, 50.0, 50.0, 0.0]);
    assert!(percentage(&[1.0], &[]).is_err());
}

#[test]
fn test_units() {
    assert!(convert_units(&[2048.0, 512.0], Unit::KB) == vec![2.0, 0.5]);
    assert!(convert_units(&[3.0 * 1024.0 * 1024.0 * 1024.0], Unit::GB) == vec![3.0]);
    assert!("MB".parse::<Unit>() == Ok(Unit::MB));
    assert!("mb".parse::<Unit>().is_err());
}

#[test]
fn test_realign() {
    // Cycle 2 failed.
    assert!(realign(&[0.5], &[2]) == vec![Some(0.5), None]);
    // Cycles 1 and 3 of 4 failed, positions given out of order.
    assert!(realign(&[1, 2], &[3, 1]) == vec![None, Some(1), None, Some(2)]);
    assert!(realign::<f64>(&[], &[1, 2]) == vec![None, None]);
    assert!(realign(&["a"], &[]) == vec![Some("a")]);
}

#[cfg(test)]
proptest! {
    #[test]
    fn prop_total_starts_at_zero(values in proptest::collection::vec(-1e12f64..1e12, 1..50)) {
        prop_assert_eq!(total(&values)[0], 0.0);
    }

    #[test]
    fn prop_delta_telescopes(values in proptest::collection::vec(0u32..1_000_000, 1..50)) {
        // Integral values keep the sum exact.
        let values = values.into_iter().map(|v| v as f64).collect::<Vec<f64>>();
        let d = delta(&values);
        prop_assert_eq!(d.len(), values.len());
        prop_assert_eq!(d[0], 0.0);
        let sum: f64 = d[1..].iter().sum();
        prop_assert_eq!(sum, values[values.len() - 1] - values[0]);
    }

    #[test]
    fn prop_byte_conversion_is_identity(values in proptest::collection::vec(any::<f64>(), 0..50)) {
        let converted = convert_units(&values, Unit::Byte);
        prop_assert_eq!(converted.len(), values.len());
        for (a, b) in converted.iter().zip(&values) {
            prop_assert!(a.to_bits() == b.to_bits());
        }
    }
}
