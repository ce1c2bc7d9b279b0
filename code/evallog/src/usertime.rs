/// The user-time aggregate: end-to-end login times as measured by the simulated browsers.
///
/// A user-time artifact is a JSON object from slot key to
/// `{login_start_time, login_finish_time, protected_resource}`, where the outcome tells whether
/// the protected resource was reached.  Accepted records contribute `total_login_time` (derived),
/// both times and the outcome; rejected ones are counted as for the timing aggregate.
use crate::error::{Error, Result};
use crate::gate::{check_user_time_record, RequiredKeys, Verdict};
use crate::records::{
    RawUserTimeCycle, SlotKey, UserTimeRecord, LOGIN_FINISH_TIME, LOGIN_START_TIME,
    PROTECTED_RESOURCE,
};
use crate::tree::Artifact;

use evalutils::{Protocol, TestConfiguration};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserTimeSeries {
    pub total_login_time: Vec<f64>,
    pub login_start_time: Vec<f64>,
    pub login_finish_time: Vec<f64>,
    pub protected_resource: Vec<String>,
    pub failed_measurements: usize,
    pub failed_measurement_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTimeAggregate {
    pub protocol: Protocol,
    pub test_duration: u32,
    pub user_count: u32,
    pub number_of_cycles: usize,
    /// As for the timing aggregate.
    #[serde(default)]
    pub cycle_artifacts: Vec<String>,
    pub data: BTreeMap<SlotKey, UserTimeSeries>,
}

impl UserTimeAggregate {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(artifact: &str, text: &str) -> Result<UserTimeAggregate> {
        serde_json::from_str(text).map_err(|e| Error::malformed_json(artifact, e))
    }
}

pub fn parse_user_time_cycle(artifact: &str, text: &str) -> Result<RawUserTimeCycle> {
    serde_json::from_str(text).map_err(|e| Error::malformed_json(artifact, e))
}

/// Decode a record that has passed the gate.  The times must be numbers; anything else is a
/// capture bug, not a failed login.

fn decode_record(
    artifact: &str,
    slot: SlotKey,
    fields: &serde_json::Map<String, serde_json::Value>,
) -> Result<UserTimeRecord> {
    let time = |key: &str| -> Result<f64> {
        match fields.get(key).and_then(|v| v.as_f64()) {
            Some(t) if t.is_finite() => Ok(t),
            _ => Err(Error::malformed(
                artifact,
                0,
                format!("{slot}: {key} is not a number"),
            )),
        }
    };
    Ok(UserTimeRecord {
        login_start_time: time(LOGIN_START_TIME)?,
        login_finish_time: time(LOGIN_FINISH_TIME)?,
        protected_resource: fields
            .get(PROTECTED_RESOURCE)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

pub struct UserTimeAccumulator {
    config: TestConfiguration,
    required: RequiredKeys,
    allowed_outcomes: Vec<String>,
    number_of_cycles: usize,
    cycle_artifacts: Vec<String>,
    data: BTreeMap<SlotKey, UserTimeSeries>,
}

impl UserTimeAccumulator {
    pub fn new(config: TestConfiguration, allowed_outcomes: &[String]) -> UserTimeAccumulator {
        UserTimeAccumulator {
            config,
            required: RequiredKeys::user_time(),
            allowed_outcomes: allowed_outcomes.to_vec(),
            number_of_cycles: 0,
            cycle_artifacts: vec![],
            data: (1..=config.user_count)
                .map(|n| (SlotKey(n), UserTimeSeries::default()))
                .collect(),
        }
    }

    pub fn ingest(&mut self, artifact: &Artifact) -> Result<Vec<(SlotKey, Verdict)>> {
        let text = artifact.read_text()?;
        let cycle = parse_user_time_cycle(&artifact.file_name, &text)?;
        tracing::debug!("Ingesting {} ({} slots)", artifact.file_name, cycle.len());
        self.ingest_cycle(&artifact.file_name, &cycle)
    }

    /// Gate and merge one cycle.  All accepted records are decoded before anything is merged, so
    /// a malformed record leaves the accumulator unchanged.

    pub fn ingest_cycle(
        &mut self,
        artifact: &str,
        cycle: &RawUserTimeCycle,
    ) -> Result<Vec<(SlotKey, Verdict)>> {
        let mut verdicts = vec![];
        for slot in self.data.keys() {
            let raw = cycle.get(slot);
            let verdict =
                check_user_time_record(raw, &self.required, &self.allowed_outcomes);
            let decoded = match (verdict, raw) {
                (Verdict::Accept, Some(fields)) => Some(decode_record(artifact, *slot, fields)?),
                _ => None,
            };
            verdicts.push((*slot, verdict, decoded));
        }

        let mut rejected = vec![];
        for (slot, verdict, decoded) in verdicts {
            let Some(series) = self.data.get_mut(&slot) else {
                continue;
            };
            match decoded {
                Some(r) => {
                    series.total_login_time.push(r.total_login_time());
                    series.login_start_time.push(r.login_start_time);
                    series.login_finish_time.push(r.login_finish_time);
                    series.protected_resource.push(r.protected_resource);
                }
                None => {
                    series.failed_measurements += 1;
                    series.failed_measurement_ids.push(artifact.to_string());
                    rejected.push((slot, verdict));
                }
            }
        }
        self.number_of_cycles += 1;
        self.cycle_artifacts.push(artifact.to_string());
        Ok(rejected)
    }

    pub fn finalize(self) -> UserTimeAggregate {
        UserTimeAggregate {
            protocol: self.config.protocol,
            test_duration: self.config.test_duration,
            user_count: self.config.user_count,
            number_of_cycles: self.number_of_cycles,
            cycle_artifacts: self.cycle_artifacts,
            data: self.data,
        }
    }
}

pub fn aggregate_user_time(
    config: TestConfiguration,
    allowed_outcomes: &[String],
    artifacts: &[Artifact],
) -> Result<UserTimeAggregate> {
    let mut acc = UserTimeAccumulator::new(config, allowed_outcomes);
    let mut failures = 0;
    for a in artifacts {
        failures += acc.ingest(a)?.len();
    }
    tracing::info!(
        "{config}: {} user-time cycles, {failures} failed measurements",
        acc.number_of_cycles
    );
    Ok(acc.finalize())
}

#[test]
fn test_user_time_fixture() {
    let conf = TestConfiguration::new(Protocol::Saml, 30, 3).unwrap();
    let name = "saml-eval-30-3-user-time-1.json";
    let artifact = Artifact {
        path: format!("../tests/evallog/{name}").into(),
        file_name: name.to_string(),
        kind: evalutils::ArtifactKind::UserTime,
        cycle_id: 1,
    };
    let allowed = vec!["True".to_string(), "False".to_string()];
    let agg = aggregate_user_time(conf, &allowed, &[artifact]).unwrap();
    assert!(agg.number_of_cycles == 1);

    let u1 = &agg.data[&SlotKey(1)];
    assert!(u1.total_login_time == vec![1.25]);
    assert!(u1.protected_resource == vec!["True".to_string()]);

    // Timed out before reaching the resource.
    let u2 = &agg.data[&SlotKey(2)];
    assert!(u2.failed_measurements == 1);
    assert!(u2.total_login_time.is_empty());

    // Never started.
    let u3 = &agg.data[&SlotKey(3)];
    assert!(u3.failed_measurement_ids == vec![name.to_string()]);
}

#[test]
fn test_user_time_malformed() {
    let conf = TestConfiguration::new(Protocol::Oidc, 60, 2).unwrap();
    let allowed = vec!["True".to_string()];
    let mut acc = UserTimeAccumulator::new(conf, &allowed);
    let cycle = parse_user_time_cycle(
        "u.json",
        r#"{"t_user_1": {"login_start_time": 1.0, "login_finish_time": 2.5, "protected_resource": "True"},
            "t_user_2": {"login_start_time": "soon", "login_finish_time": 2.5, "protected_resource": "True"}}"#,
    )
    .unwrap();
    assert!(acc.ingest_cycle("u.json", &cycle).unwrap_err().is_malformed());
    let agg = acc.finalize();
    assert!(agg.number_of_cycles == 0);
    assert!(agg.data[&SlotKey(1)].total_login_time.is_empty());
    assert!(parse_user_time_cycle("u.json", "[1, 2]").unwrap_err().is_malformed());
}
