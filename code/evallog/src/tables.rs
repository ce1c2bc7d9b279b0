/// Tabular views of the aggregates: one row per (user, cycle), with failed cycles present as
/// rows without a measurement.  This is the shape plotting and other downstream consumers want.
use crate::aggregate::Aggregate;
use crate::derived::realign;
use crate::error::{Error, Result};
use crate::records::{SlotKey, LOGIN_FINISH_TIME, LOGIN_START_TIME, TOTAL_LOGIN_TIME};
use crate::usertime::UserTimeAggregate;

use evalutils::trailing_cycle_id;

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow<T> {
    pub user_id: u32,
    pub cycle_id: u32,
    pub measurement: Option<T>,
}

/// The 1-based cycle positions of a slot's failures: the rank of each failure id among the
/// artifacts the aggregate ingested.  A slot's failures were recorded in ingestion order, so the
/// search for each one resumes after the previous match.  Aggregates without the artifact list
/// fall back on the cycle ids at the end of the failure ids.

fn failed_positions(
    slot: SlotKey,
    cycle_artifacts: &[String],
    failure_ids: &[String],
) -> Result<Vec<u32>> {
    if cycle_artifacts.is_empty() {
        return failure_ids
            .iter()
            .map(|id| {
                trailing_cycle_id(id).ok_or_else(|| {
                    Error::Query(format!("{slot}: failure id '{id}' has no cycle number"))
                })
            })
            .collect();
    }
    let mut positions = vec![];
    let mut next = 0;
    for id in failure_ids {
        let Some(i) = cycle_artifacts[next..].iter().position(|a| a == id) else {
            return Err(Error::Query(format!(
                "{slot}: failure id '{id}' is not an ingested cycle"
            )));
        };
        positions.push((next + i) as u32 + 1);
        next += i + 1;
    }
    Ok(positions)
}

fn explode<T: Clone>(
    slot: SlotKey,
    values: &[T],
    cycle_artifacts: &[String],
    failure_ids: &[String],
    rows: &mut Vec<TableRow<T>>,
) -> Result<()> {
    let aligned = realign(values, &failed_positions(slot, cycle_artifacts, failure_ids)?);
    for (i, m) in aligned.into_iter().enumerate() {
        rows.push(TableRow {
            user_id: slot.index(),
            cycle_id: i as u32 + 1,
            measurement: m,
        });
    }
    Ok(())
}

/// Rows for phase key `phase` (eg `dispatch_time`) of every slot, in slot then cycle order.

pub fn phase_table(agg: &Aggregate, phase: &str) -> Result<Vec<TableRow<f64>>> {
    let mut rows = vec![];
    for (slot, series) in &agg.data {
        let values = series.phases.get(phase).ok_or_else(|| {
            Error::Query(format!("No phase '{phase}' for {}", agg.protocol))
        })?;
        explode(
            *slot,
            values,
            &agg.cycle_artifacts,
            &series.failed_measurement_ids,
            &mut rows,
        )?;
    }
    Ok(rows)
}

/// Rows for one of the numeric user-time keys.

pub fn user_time_table(agg: &UserTimeAggregate, key: &str) -> Result<Vec<TableRow<f64>>> {
    let mut rows = vec![];
    for (slot, series) in &agg.data {
        let values = match key {
            TOTAL_LOGIN_TIME => &series.total_login_time,
            LOGIN_START_TIME => &series.login_start_time,
            LOGIN_FINISH_TIME => &series.login_finish_time,
            _ => return Err(Error::Query(format!("No user-time key '{key}'"))),
        };
        explode(
            *slot,
            values,
            &agg.cycle_artifacts,
            &series.failed_measurement_ids,
            &mut rows,
        )?;
    }
    Ok(rows)
}

/// Rows for the `protected_resource` outcomes.

pub fn outcome_table(agg: &UserTimeAggregate) -> Result<Vec<TableRow<String>>> {
    let mut rows = vec![];
    for (slot, series) in &agg.data {
        explode(
            *slot,
            &series.protected_resource,
            &agg.cycle_artifacts,
            &series.failed_measurement_ids,
            &mut rows,
        )?;
    }
    Ok(rows)
}

#[cfg(test)]
use crate::aggregate::Accumulator;
#[cfg(test)]
use crate::records::{CycleLog, PhaseRecord};
#[cfg(test)]
use evalutils::{Protocol, TestConfiguration};

#[cfg(test)]
fn complete(value: f64) -> PhaseRecord {
    let mut r = PhaseRecord::new();
    for p in crate::phases::protocol_phases(Protocol::Saml) {
        r.set(p.key(), value);
    }
    r
}

#[test]
fn test_failed_cycle_is_null_row() {
    // Two users, cycle 1 fine, cycle 2 rejected for slot 2 only.
    let conf = TestConfiguration::new(Protocol::Saml, 30, 2).unwrap();
    let mut acc = Accumulator::new(conf);
    let mut c1 = CycleLog::new();
    c1.insert(SlotKey(1), complete(0.5));
    c1.insert(SlotKey(2), complete(0.6));
    acc.ingest_cycle("saml-eval-30-2-1.json", &c1);
    let mut c2 = CycleLog::new();
    c2.insert(SlotKey(1), complete(0.7));
    let mut partial = complete(0.8);
    partial.fields.remove("login_time");
    c2.insert(SlotKey(2), partial);
    acc.ingest_cycle("saml-eval-30-2-2.json", &c2);
    let agg = acc.finalize();

    let rows = phase_table(&agg, "login_time").unwrap();
    assert!(rows.len() == 4);
    let slot2 = rows.iter().filter(|r| r.user_id == 2).collect::<Vec<_>>();
    assert!(slot2.len() == 2);
    assert!(slot2[0].cycle_id == 1 && slot2[0].measurement == Some(0.6));
    assert!(slot2[1].cycle_id == 2 && slot2[1].measurement.is_none());
    let slot1 = rows.iter().filter(|r| r.user_id == 1).collect::<Vec<_>>();
    assert!(slot1[1].measurement == Some(0.7));

    assert!(matches!(phase_table(&agg, "dispatch_time"), Err(Error::Query(_))));
}

#[test]
fn test_bad_failure_id() {
    let conf = TestConfiguration::new(Protocol::Saml, 30, 1).unwrap();
    let mut acc = Accumulator::new(conf);
    acc.ingest_cycle("no-number-here", &CycleLog::new());
    let mut agg = acc.finalize();
    assert!(phase_table(&agg, "login_time").unwrap()[0].measurement.is_none());

    // Without the artifact list the position must come from the name.
    agg.cycle_artifacts.clear();
    assert!(phase_table(&agg, "login_time").is_err());

    agg.cycle_artifacts = vec!["saml-eval-30-1-1.json".to_string()];
    assert!(phase_table(&agg, "login_time").is_err());
}

#[test]
fn test_rows_align_when_cycle_ids_do_not_start_at_one() {
    // Cycles 5 and 6; slot 1 fails cycle 5, slot 2 succeeds in both.
    let conf = TestConfiguration::new(Protocol::Saml, 30, 2).unwrap();
    let mut acc = Accumulator::new(conf);
    let mut c5 = CycleLog::new();
    c5.insert(SlotKey(2), complete(5.0));
    acc.ingest_cycle("saml-eval-30-2-5.json", &c5);
    let mut c6 = CycleLog::new();
    c6.insert(SlotKey(1), complete(6.0));
    c6.insert(SlotKey(2), complete(6.0));
    acc.ingest_cycle("saml-eval-30-2-6.json", &c6);
    let agg = acc.finalize();

    let rows = phase_table(&agg, "login_time").unwrap();
    let cells = rows
        .iter()
        .map(|r| (r.user_id, r.cycle_id, r.measurement))
        .collect::<Vec<_>>();
    assert!(
        cells
            == vec![
                (1, 1, None),
                (1, 2, Some(6.0)),
                (2, 1, Some(5.0)),
                (2, 2, Some(6.0)),
            ]
    );

    // The same name ingested twice is ranked by occurrence.
    let mut acc = Accumulator::new(TestConfiguration::new(Protocol::Saml, 30, 1).unwrap());
    let mut ok = CycleLog::new();
    ok.insert(SlotKey(1), complete(1.0));
    acc.ingest_cycle("saml-eval-30-1-3.json", &ok);
    acc.ingest_cycle("saml-eval-30-1-3.json", &CycleLog::new());
    let rows = phase_table(&acc.finalize(), "login_time").unwrap();
    assert!(rows[0].measurement == Some(1.0) && rows[1].measurement.is_none());
}

#[test]
fn test_outcome_table() {
    let conf = TestConfiguration::new(Protocol::Oidc, 60, 1).unwrap();
    let allowed = vec!["True".to_string(), "False".to_string()];
    let mut acc = crate::usertime::UserTimeAccumulator::new(conf, &allowed);
    let c = crate::usertime::parse_user_time_cycle(
        "u-1.json",
        r#"{"t_user_1": {"login_start_time": 1, "login_finish_time": 3, "protected_resource": "False"}}"#,
    )
    .unwrap();
    acc.ingest_cycle("oidc-eval-60-1-user-time-1.json", &c).unwrap();
    acc.ingest_cycle("oidc-eval-60-1-user-time-2.json", &Default::default())
        .unwrap();
    let agg = acc.finalize();
    let rows = outcome_table(&agg).unwrap();
    assert!(rows.len() == 2);
    assert!(rows[0].measurement.as_deref() == Some("False"));
    assert!(rows[1].measurement.is_none());
    let rows = user_time_table(&agg, "total_login_time").unwrap();
    assert!(rows[0].measurement == Some(2.0));
    assert!(user_time_table(&agg, "protected_resource").is_err());
}
