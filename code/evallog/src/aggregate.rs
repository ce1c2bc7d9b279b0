/// The timing aggregate for one test configuration, and the accumulator that builds it.
///
/// Every slot 1..user_count is present in the aggregate from the start, so a configuration whose
/// every cycle was rejected still yields a full set of slots, each with zero samples and all
/// cycles counted as failures.  For each slot, after all cycles have been ingested:
///
///   len(samples of any phase) + failed_measurements == number_of_cycles
///
/// Samples are appended in ingestion order, and a rejected cycle appends nothing.  The names of the
/// ingested artifacts are kept in order in `cycle_artifacts`, and the position of a failure is
/// recovered at query time as the rank of its failure id in that list (see `tables.rs`).
use crate::error::{Error, Result};
use crate::gate::{check_phase_record, RequiredKeys, Verdict};
use crate::records::{CycleLog, SlotKey};
use crate::timinglog::{parse_cycle_log, transform_timing_log};
use crate::tree::Artifact;

use evalutils::{ArtifactKind, Protocol, TestConfiguration};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One slot's history across cycles.  The phase series are flattened into the slot's object in
/// the persisted form, next to the failure bookkeeping.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotSeries {
    #[serde(flatten)]
    pub phases: BTreeMap<String, Vec<f64>>,
    pub failed_measurements: usize,
    pub failed_measurement_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub protocol: Protocol,
    pub test_duration: u32,
    pub user_count: u32,
    pub number_of_cycles: usize,
    /// Absent from aggregates written before the list was kept.
    #[serde(default)]
    pub cycle_artifacts: Vec<String>,
    pub data: BTreeMap<SlotKey, SlotSeries>,
}

impl Aggregate {
    pub fn configuration(&self) -> Result<TestConfiguration> {
        Ok(TestConfiguration::new(
            self.protocol,
            self.test_duration,
            self.user_count,
        )?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(artifact: &str, text: &str) -> Result<Aggregate> {
        serde_json::from_str(text).map_err(|e| Error::malformed_json(artifact, e))
    }
}

/// The result of ingesting one cycle: the slots that failed and why.

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleOutcome {
    pub accepted: usize,
    pub rejected: Vec<(SlotKey, Verdict)>,
}

pub struct Accumulator {
    config: TestConfiguration,
    required: RequiredKeys,
    number_of_cycles: usize,
    cycle_artifacts: Vec<String>,
    data: BTreeMap<SlotKey, SlotSeries>,
}

impl Accumulator {
    pub fn new(config: TestConfiguration) -> Accumulator {
        let required = RequiredKeys::for_protocol(config.protocol);
        let mut data = BTreeMap::new();
        for n in 1..=config.user_count {
            let mut series = SlotSeries::default();
            for k in required.iter() {
                series.phases.insert(k.to_string(), vec![]);
            }
            data.insert(SlotKey(n), series);
        }
        Accumulator {
            config,
            required,
            number_of_cycles: 0,
            cycle_artifacts: vec![],
            data,
        }
    }

    pub fn config(&self) -> &TestConfiguration {
        &self.config
    }

    /// Read and transform a timing artifact, raw or serialized, and ingest it.  A malformed
    /// artifact is an error and leaves the accumulator unchanged.

    pub fn ingest(&mut self, artifact: &Artifact) -> Result<CycleOutcome> {
        let text = artifact.read_text()?;
        let log = match artifact.kind {
            ArtifactKind::TimingLog => {
                transform_timing_log(self.config.protocol, &artifact.file_name, &text)?
            }
            ArtifactKind::TimingJson => parse_cycle_log(&artifact.file_name, &text)?,
            _ => {
                return Err(Error::Config(format!(
                    "Not a timing artifact: {}",
                    artifact.file_name
                )))
            }
        };
        tracing::debug!("Ingesting {} ({} slots)", artifact.file_name, log.len());
        Ok(self.ingest_cycle(&artifact.file_name, &log))
    }

    /// Gate every slot of the configuration against `log` and merge the result.  `artifact` is the
    /// name recorded for failures.

    pub fn ingest_cycle(&mut self, artifact: &str, log: &CycleLog) -> CycleOutcome {
        let mut outcome = CycleOutcome::default();
        for (slot, series) in self.data.iter_mut() {
            match check_phase_record(log.get(slot), &self.required) {
                Verdict::Accept => {
                    // The gate guarantees every required key is present.
                    if let Some(record) = log.get(slot) {
                        for (k, v) in &record.fields {
                            series.phases.entry(k.clone()).or_default().push(*v);
                        }
                    }
                    outcome.accepted += 1;
                }
                verdict => {
                    series.failed_measurements += 1;
                    series.failed_measurement_ids.push(artifact.to_string());
                    outcome.rejected.push((*slot, verdict));
                }
            }
        }
        for slot in log.keys() {
            if slot.index() > self.config.user_count {
                tracing::warn!(
                    "{artifact}: {slot} is beyond the user count {} and is ignored",
                    self.config.user_count
                );
            }
        }
        self.number_of_cycles += 1;
        self.cycle_artifacts.push(artifact.to_string());
        outcome
    }

    pub fn number_of_cycles(&self) -> usize {
        self.number_of_cycles
    }

    pub fn finalize(self) -> Aggregate {
        Aggregate {
            protocol: self.config.protocol,
            test_duration: self.config.test_duration,
            user_count: self.config.user_count,
            number_of_cycles: self.number_of_cycles,
            cycle_artifacts: self.cycle_artifacts,
            data: self.data,
        }
    }
}

/// Ingest `artifacts` in order into a fresh accumulator.

pub fn aggregate_timing(config: TestConfiguration, artifacts: &[Artifact]) -> Result<Aggregate> {
    let mut acc = Accumulator::new(config);
    let mut failures = 0;
    for a in artifacts {
        failures += acc.ingest(a)?.rejected.len();
    }
    tracing::info!(
        "{config}: {} cycles, {failures} failed measurements",
        acc.number_of_cycles()
    );
    Ok(acc.finalize())
}

#[cfg(test)]
use crate::records::PhaseRecord;

#[cfg(test)]
fn complete(protocol: Protocol, value: f64) -> PhaseRecord {
    let mut r = PhaseRecord::new();
    for p in crate::phases::protocol_phases(protocol) {
        r.set(p.key(), value);
    }
    r
}

#[test]
fn test_incomplete_cycle() {
    let conf = TestConfiguration::new(Protocol::Oidc, 60, 1).unwrap();
    let log = transform_timing_log(
        Protocol::Oidc,
        "oidc-eval-60-1-1.log",
        "INFO redirect 0.12\nINFO get_access_token 0.05\nINFO _decode_id_token 0.02\n",
    )
    .unwrap();
    let mut acc = Accumulator::new(conf);
    let outcome = acc.ingest_cycle("oidc-eval-60-1-1.log", &log);
    assert!(outcome.accepted == 0);
    assert!(
        outcome.rejected
            == vec![(SlotKey(1), Verdict::Reject(crate::gate::RejectReason::Incomplete))]
    );
    let agg = acc.finalize();
    let s = &agg.data[&SlotKey(1)];
    assert!(s.failed_measurements == 1);
    assert!(s.failed_measurement_ids == vec!["oidc-eval-60-1-1.log".to_string()]);
    assert!(s.phases["redirect_time"].is_empty());
    assert!(s.phases["get_access_token_time"].is_empty());
}

#[test]
fn test_all_failed_is_well_formed() {
    let conf = TestConfiguration::new(Protocol::Saml, 30, 3).unwrap();
    let mut acc = Accumulator::new(conf);
    acc.ingest_cycle("saml-eval-30-3-1.json", &CycleLog::new());
    acc.ingest_cycle("saml-eval-30-3-2.json", &CycleLog::new());
    let agg = acc.finalize();
    assert!(agg.number_of_cycles == 2);
    assert!(agg.data.len() == 3);
    for s in agg.data.values() {
        assert!(s.failed_measurements == 2);
        assert!(s.phases.len() == 5);
        assert!(s.phases.values().all(|v| v.is_empty()));
    }
}

#[test]
fn test_slot_count_invariant() {
    let conf = TestConfiguration::new(Protocol::Oidc, 60, 3).unwrap();
    let mut acc = Accumulator::new(conf);
    for cycle in 1..=7u32 {
        let mut log = CycleLog::new();
        for n in 1..=4u32 {
            // Every slot fails on some cycles; slot 4 is out of range.
            if (cycle + n) % 3 != 0 {
                log.insert(SlotKey(n), complete(Protocol::Oidc, cycle as f64));
            }
        }
        acc.ingest_cycle(&format!("oidc-eval-60-3-{cycle}.json"), &log);
    }
    let agg = acc.finalize();
    assert!(agg.data.len() == 3);
    for s in agg.data.values() {
        for v in s.phases.values() {
            assert!(v.len() + s.failed_measurements == agg.number_of_cycles);
        }
        assert!(s.failed_measurement_ids.len() == s.failed_measurements);
    }
}

#[test]
fn test_aggregate_from_files() {
    let conf = TestConfiguration::new(Protocol::Oidc, 60, 2).unwrap();
    let artifacts = ["oidc-eval-60-2-1.log", "oidc-eval-60-2-2.log"]
        .iter()
        .enumerate()
        .map(|(i, name)| Artifact {
            path: format!("../tests/evallog/{name}").into(),
            file_name: name.to_string(),
            kind: ArtifactKind::TimingLog,
            cycle_id: i as u32 + 1,
        })
        .collect::<Vec<Artifact>>();

    let a = aggregate_timing(conf, &artifacts).unwrap();
    let b = aggregate_timing(conf, &artifacts).unwrap();
    assert!(a.to_json().unwrap() == b.to_json().unwrap());

    assert!(a.number_of_cycles == 2);
    assert!(a.cycle_artifacts == vec!["oidc-eval-60-2-1.log", "oidc-eval-60-2-2.log"]);
    let u1 = &a.data[&SlotKey(1)];
    assert!(u1.phases["redirect_time"] == vec![0.121, 0.133]);
    assert!(u1.failed_measurements == 0);
    let u2 = &a.data[&SlotKey(2)];
    assert!(u2.phases["dispatch_time"] == vec![1.262]);
    assert!(u2.failed_measurement_ids == vec!["oidc-eval-60-2-2.log".to_string()]);

    let back = Aggregate::from_json("oidc-eval-60-2-aggregate.json", &a.to_json().unwrap()).unwrap();
    assert!(back == a);
    let v: serde_json::Value = serde_json::from_str(&a.to_json().unwrap()).unwrap();
    assert!(v["protocol"] == "oidc");
    assert!(v["data"]["t_user_2"]["failed_measurements"] == 1);
    assert!(v["data"]["t_user_1"]["complete_login_time"][1] == 0.702);
}
