/// Summary statistics over the accepted samples of an aggregate.
use crate::aggregate::Aggregate;
use crate::phases::protocol_phases;
use crate::usertime::UserTimeAggregate;

use itertools::Itertools;

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// None for the row summarizing all slots.
    pub user_id: Option<u32>,
    pub key: String,
    pub count: usize,
    pub failed: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Population standard deviation.
    pub stddev: Option<f64>,
}

pub fn summarize(user_id: Option<u32>, key: &str, values: &[f64], failed: usize) -> Summary {
    let sorted = values
        .iter()
        .copied()
        .sorted_by(|a, b| a.total_cmp(b))
        .collect::<Vec<f64>>();
    let n = sorted.len();
    let (mean, median, min, max, stddev) = if n == 0 {
        (None, None, None, None, None)
    } else {
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };
        let var = sorted.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;
        (
            Some(mean),
            Some(median),
            Some(sorted[0]),
            Some(sorted[n - 1]),
            Some(var.sqrt()),
        )
    };
    Summary {
        user_id,
        key: key.to_string(),
        count: n,
        failed,
        mean,
        median,
        min,
        max,
        stddev,
    }
}

/// Per phase in protocol order: one row per slot, then one row for all slots together.

pub fn phase_stats(agg: &Aggregate) -> Vec<Summary> {
    let mut result = vec![];
    for phase in protocol_phases(agg.protocol) {
        let key = phase.key();
        let mut all = vec![];
        let mut all_failed = 0;
        for (slot, series) in &agg.data {
            let values = series.phases.get(key).map(|v| v.as_slice()).unwrap_or(&[]);
            result.push(summarize(
                Some(slot.index()),
                key,
                values,
                series.failed_measurements,
            ));
            all.extend_from_slice(values);
            all_failed += series.failed_measurements;
        }
        result.push(summarize(None, key, &all, all_failed));
    }
    result
}

/// As `phase_stats`, for the total login time.

pub fn user_time_stats(agg: &UserTimeAggregate) -> Vec<Summary> {
    let key = crate::records::TOTAL_LOGIN_TIME;
    let mut result = vec![];
    let mut all = vec![];
    let mut all_failed = 0;
    for (slot, series) in &agg.data {
        result.push(summarize(
            Some(slot.index()),
            key,
            &series.total_login_time,
            series.failed_measurements,
        ));
        all.extend_from_slice(&series.total_login_time);
        all_failed += series.failed_measurements;
    }
    result.push(summarize(None, key, &all, all_failed));
    result
}

#[test]
fn test_summarize() {
    let s = summarize(Some(1), "dispatch_time", &[4.0, 2.0, 6.0, 8.0], 1);
    assert!(s.count == 4 && s.failed == 1);
    assert!(s.mean == Some(5.0));
    assert!(s.median == Some(5.0));
    assert!(s.min == Some(2.0) && s.max == Some(8.0));
    assert!(s.stddev == Some(5.0f64.sqrt()));

    let s = summarize(None, "dispatch_time", &[3.0, 1.0, 2.0], 0);
    assert!(s.median == Some(2.0));

    let s = summarize(Some(2), "dispatch_time", &[], 3);
    assert!(s.count == 0 && s.mean.is_none() && s.stddev.is_none());
}

#[test]
fn test_phase_stats_layout() {
    let conf = evalutils::TestConfiguration::new(evalutils::Protocol::Oidc, 60, 2).unwrap();
    let agg = crate::aggregate::Accumulator::new(conf).finalize();
    let stats = phase_stats(&agg);
    // Five phases, two slots plus the all-slots row each.
    assert!(stats.len() == 15);
    assert!(stats[0].key == "redirect_time" && stats[0].user_id == Some(1));
    assert!(stats[2].user_id.is_none());
    assert!(stats[14].key == "dispatch_time");
}
