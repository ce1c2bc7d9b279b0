/// Resource records across the cycles of one configuration and origin, and metric queries over
/// them.
///
/// Unlike the timing data, resource records are not folded into one structure: each cycle keeps
/// its own ResourceRecordSet, since every cycle's counters start from wherever the cgroup happened
/// to be.  Queries are answered per cycle and concatenated in cycle order.
use crate::derived::{convert_units, delta, percentage, total, Unit};
use crate::error::{Error, Result};
use crate::resmon::{parse_resource_records, transform_resmon_record, Resource, ResourceRecordSet};
use crate::tree::Artifact;

use evalutils::{seconds_since, ArtifactKind, EvalConfig, Origin, TestConfiguration};
use std::str::FromStr;

/// cpu.stat counts microseconds; timestamps are nanoseconds.

const CPU_TIME_TO_NANOS: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceCycle {
    pub cycle_id: u32,
    pub artifact: String,
    pub records: ResourceRecordSet,
}

pub struct ResourceAccumulator<'a> {
    config: TestConfiguration,
    origin: Origin,
    eval_config: &'a EvalConfig,
    cycles: Vec<ResourceCycle>,
}

impl<'a> ResourceAccumulator<'a> {
    pub fn new(
        config: TestConfiguration,
        origin: Origin,
        eval_config: &'a EvalConfig,
    ) -> ResourceAccumulator<'a> {
        ResourceAccumulator {
            config,
            origin,
            eval_config,
            cycles: vec![],
        }
    }

    /// Read a resmon artifact of this accumulator's origin, raw or serialized.

    pub fn ingest(&mut self, artifact: &Artifact) -> Result<()> {
        let text = artifact.read_text()?;
        let records = match artifact.kind {
            ArtifactKind::ResmonRaw(o) if o == self.origin => {
                transform_resmon_record(o, self.eval_config, &artifact.file_name, &text)?
            }
            ArtifactKind::ResmonJson(o) if o == self.origin => {
                parse_resource_records(&artifact.file_name, &text)?
            }
            _ => {
                return Err(Error::Config(format!(
                    "Not an {} resmon artifact: {}",
                    self.origin, artifact.file_name
                )))
            }
        };
        tracing::debug!(
            "Ingesting {} ({} groups)",
            artifact.file_name,
            records.groups.len()
        );
        self.cycles.push(ResourceCycle {
            cycle_id: artifact.cycle_id,
            artifact: artifact.file_name.clone(),
            records,
        });
        Ok(())
    }

    pub fn finalize(self) -> Vec<ResourceCycle> {
        tracing::info!(
            "{}: {} {} resource records",
            self.config,
            self.cycles.len(),
            self.origin
        );
        self.cycles
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Raw,
    Total,
    Delta,
    Percentage,
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Method, String> {
        match s {
            "raw" => Ok(Method::Raw),
            "total" => Ok(Method::Total),
            "delta" => Ok(Method::Delta),
            "percentage" => Ok(Method::Percentage),
            _ => Err(format!(
                "Unknown method '{s}', expected raw, total, delta or percentage"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    pub group: String,
    pub resource: Resource,
    pub variable: String,
    pub device: Option<String>,
    pub method: Method,
    pub unit: Unit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRow {
    pub cycle_id: u32,
    pub timestamp_ns: u64,
    /// Relative to the first sample of the series within its cycle.
    pub seconds: f64,
    pub value: f64,
}

impl MetricQuery {
    fn check(&self) -> Result<()> {
        if !self.resource.variables().contains(&self.variable.as_str()) {
            return Err(Error::Query(format!(
                "Unknown variable '{}', expected one of {}",
                self.variable,
                self.resource.variables().join(", ")
            )));
        }
        match (self.resource, &self.device) {
            (Resource::Io, None) => {
                return Err(Error::Query("An io query needs a device".to_string()))
            }
            (Resource::Cpu | Resource::Memory, Some(_)) => {
                return Err(Error::Query("Only io queries take a device".to_string()))
            }
            _ => {}
        }
        if self.method == Method::Percentage && self.resource != Resource::Cpu {
            return Err(Error::Query(
                "Percentages are only defined for cpu".to_string(),
            ));
        }
        if self.resource == Resource::Cpu && self.unit != Unit::Byte {
            return Err(Error::Query("Units do not apply to cpu".to_string()));
        }
        Ok(())
    }

    /// (timestamps, values) of the queried series in `records`, or None if the group or device
    /// was not seen in that cycle.

    fn series<'r>(&self, records: &'r ResourceRecordSet) -> Option<(&'r [u64], &'r [u64])> {
        let snapshot = records.groups.get(&self.group)?;
        match self.resource {
            Resource::Cpu => Some((
                &snapshot.cpu.timestamps,
                snapshot.cpu.variable(&self.variable)?,
            )),
            Resource::Memory => Some((
                &snapshot.memory.timestamps,
                snapshot.memory.variable(&self.variable)?,
            )),
            Resource::Io => {
                let dev = snapshot.io.get(self.device.as_ref()?)?;
                Some((&dev.timestamps, dev.variable(&self.variable)?))
            }
        }
    }
}

/// Answer `query` for every cycle, in order.  A cycle in which the group (or device) does not
/// appear contributes no rows; a group that appears in no cycle at all is an error.

pub fn resource_table(cycles: &[ResourceCycle], query: &MetricQuery) -> Result<Vec<ResourceRow>> {
    query.check()?;
    let mut rows = vec![];
    let mut seen = false;
    for cycle in cycles {
        let Some((timestamps, raw)) = query.series(&cycle.records) else {
            continue;
        };
        seen = true;
        let values = raw.iter().map(|v| *v as f64).collect::<Vec<f64>>();
        let values = match query.method {
            Method::Raw => values,
            Method::Total => total(&values),
            Method::Delta => delta(&values),
            Method::Percentage => {
                let scaled = values
                    .iter()
                    .map(|v| v * CPU_TIME_TO_NANOS)
                    .collect::<Vec<f64>>();
                let start = timestamps.first().copied().unwrap_or_default();
                let ts = timestamps
                    .iter()
                    .map(|t| (*t as i128 - start as i128) as f64)
                    .collect::<Vec<f64>>();
                percentage(&scaled, &ts)?
            }
        };
        let values = match query.resource {
            Resource::Cpu => values,
            _ => convert_units(&values, query.unit),
        };
        let origin = timestamps.first().copied().unwrap_or_default();
        for (ts, value) in timestamps.iter().zip(values) {
            rows.push(ResourceRow {
                cycle_id: cycle.cycle_id,
                timestamp_ns: *ts,
                seconds: seconds_since(origin, *ts),
                value,
            });
        }
    }
    if !seen {
        return Err(Error::Query(match &query.device {
            Some(d) => format!("No records for device {d} of group {}", query.group),
            None => format!("No records for group {}", query.group),
        }));
    }
    Ok(rows)
}

#[cfg(test)]
fn sp_cycles() -> Vec<ResourceCycle> {
    let conf = TestConfiguration::new(evalutils::Protocol::Oidc, 60, 2).unwrap();
    let eval_config = EvalConfig::default();
    let name = "oidc-eval-60-2-sp-resmon-1.txt";
    let mut acc = ResourceAccumulator::new(conf, Origin::Sp, &eval_config);
    acc.ingest(&Artifact {
        path: format!("../tests/evallog/{name}").into(),
        file_name: name.to_string(),
        kind: ArtifactKind::ResmonRaw(Origin::Sp),
        cycle_id: 1,
    })
    .unwrap();
    acc.finalize()
}

#[cfg(test)]
fn query(group: &str, resource: Resource, variable: &str) -> MetricQuery {
    MetricQuery {
        group: group.to_string(),
        resource,
        variable: variable.to_string(),
        device: None,
        method: Method::Raw,
        unit: Unit::Byte,
    }
}

#[test]
fn test_cpu_percentage() {
    let cycles = sp_cycles();
    let mut q = query("nginx", Resource::Cpu, "total_cpu_time");
    q.method = Method::Percentage;
    let rows = resource_table(&cycles, &q).unwrap();
    assert!(rows.len() == 2);
    assert!(rows[0].value == 0.0 && rows[0].seconds == 0.0);
    // 2500us of cpu in one second.
    assert!((rows[1].value - 0.25).abs() < 1e-9);
    assert!(rows[1].seconds == 1.0);
    assert!(rows[1].cycle_id == 1);
}

#[test]
fn test_memory_and_io() {
    let cycles = sp_cycles();
    let mut q = query("nginx", Resource::Memory, "anonymous_memory");
    q.method = Method::Delta;
    q.unit = Unit::KB;
    let rows = resource_table(&cycles, &q).unwrap();
    assert!(rows.iter().map(|r| r.value).collect::<Vec<f64>>() == vec![0.0, 8.0]);

    let mut q = query("nginx", Resource::Io, "written_bytes");
    q.device = Some("8:0".to_string());
    q.method = Method::Total;
    let rows = resource_table(&cycles, &q).unwrap();
    assert!(rows[1].value == 4096.0);
}

#[test]
fn test_bad_queries() {
    let cycles = sp_cycles();
    let is_query_err = |r: Result<Vec<ResourceRow>>| matches!(r, Err(Error::Query(_)));
    assert!(is_query_err(resource_table(&cycles, &query("redis", Resource::Cpu, "total_cpu_time"))));
    assert!(is_query_err(resource_table(&cycles, &query("nginx", Resource::Cpu, "anon"))));
    assert!(is_query_err(resource_table(&cycles, &query("nginx", Resource::Io, "read_bytes"))));

    let mut q = query("nginx", Resource::Memory, "kernel_memory");
    q.method = Method::Percentage;
    assert!(is_query_err(resource_table(&cycles, &q)));

    let mut q = query("nginx", Resource::Cpu, "total_cpu_time");
    q.unit = Unit::MB;
    assert!(is_query_err(resource_table(&cycles, &q)));

    let mut q = query("gunicorn", Resource::Io, "read_bytes");
    q.device = Some("8:0".to_string());
    assert!(is_query_err(resource_table(&cycles, &q)));
}
