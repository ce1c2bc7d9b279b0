/// Parser for raw resource-monitor (resmon) records, and the structured form they are turned into.
///
/// A raw record is a sequence of chunks separated by delimiter rows `---`.  Blank lines are
/// ignored everywhere.
///
/// The first chunk may be a header of directives, one per line:
///
///   container <id> <name>               (IdP side) container id prefix and container name
///   device <major:minor> <name> <size>  block device name and size in bytes
///
/// Every other chunk is one block: a header line `<group> <kind> <timestamp>` followed by the
/// accounting lines for that kind, where kind is one of
///
///   cpu     `<key> <value>` lines from cpu.stat: usage_usec, user_usec, system_usec, nr_periods,
///           nr_throttled, throttled_usec
///   memory  `<key> <value>` lines from memory.stat: anon, file, kernel
///   io      `<major:minor> rbytes=<n> wbytes=<n> rios=<n> wios=<n> ...` lines from io.stat
///
/// and the timestamp is in nanoseconds.  The group is the cgroup path on the SP side and the
/// container scope on the IdP side; it is resolved to a monitored group name through the
/// configuration.
///
/// The accounting system omits lines it has nothing to say about (notably the throttling counters
/// of a group that has not been throttled, or everything for a group that was frozen while the
/// snapshot was taken).  A missing cpu or memory key is recorded as 0 so that every field series
/// of a resource has exactly as many elements as its timestamp series.  Unknown keys are ignored.
/// I/O is kept per device, and a device's series is created the first time the device shows up
/// for a group.
///
/// When several blocks resolve to the same group, kind and timestamp (containers filed under the
/// catch-all group, say), their values are summed into one sample.
///
/// A block header that does not have the shape above, a value that is not an unsigned integer, or
/// a timestamp that goes backwards within a series makes the whole artifact malformed.
use crate::error::{Error, Result};

use evalutils::{EvalConfig, Origin};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DELIMITER: &str = "---";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuSeries {
    pub timestamps: Vec<u64>,
    pub total_cpu_time: Vec<u64>,
    pub user_space_cpu_time: Vec<u64>,
    pub kernel_cpu_time: Vec<u64>,
    pub run_periods: Vec<u64>,
    pub throttled_periods: Vec<u64>,
    pub total_throttled_time: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySeries {
    pub timestamps: Vec<u64>,
    pub anonymous_memory: Vec<u64>,
    pub file_system_cache_memory: Vec<u64>,
    pub kernel_memory: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IoDeviceSeries {
    pub name: String,
    pub size: u64,
    pub timestamps: Vec<u64>,
    pub read_bytes: Vec<u64>,
    pub written_bytes: Vec<u64>,
    pub read_io_ops: Vec<u64>,
    pub write_io_ops: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu: CpuSeries,
    pub memory: MemorySeries,
    pub io: BTreeMap<String, IoDeviceSeries>,
}

/// The parsed content of one resmon artifact: monitored group name -> snapshot.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceRecordSet {
    pub groups: BTreeMap<String, ResourceSnapshot>,
}

/// The resources of a snapshot, and the variables of each resource.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Cpu,
    Memory,
    Io,
}

impl std::str::FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Resource, String> {
        match s {
            "cpu" => Ok(Resource::Cpu),
            "memory" => Ok(Resource::Memory),
            "io" => Ok(Resource::Io),
            _ => Err(format!("Unknown resource '{s}', expected cpu, memory or io")),
        }
    }
}

impl Resource {
    pub fn variables(&self) -> &'static [&'static str] {
        match self {
            Resource::Cpu => &[
                "total_cpu_time",
                "user_space_cpu_time",
                "kernel_cpu_time",
                "run_periods",
                "throttled_periods",
                "total_throttled_time",
            ],
            Resource::Memory => &["anonymous_memory", "file_system_cache_memory", "kernel_memory"],
            Resource::Io => &["read_bytes", "written_bytes", "read_io_ops", "write_io_ops"],
        }
    }
}

impl CpuSeries {
    pub fn variable(&self, name: &str) -> Option<&[u64]> {
        match name {
            "total_cpu_time" => Some(&self.total_cpu_time),
            "user_space_cpu_time" => Some(&self.user_space_cpu_time),
            "kernel_cpu_time" => Some(&self.kernel_cpu_time),
            "run_periods" => Some(&self.run_periods),
            "throttled_periods" => Some(&self.throttled_periods),
            "total_throttled_time" => Some(&self.total_throttled_time),
            _ => None,
        }
    }

    fn push(&mut self, timestamp: u64, values: [u64; 6]) -> bool {
        let CpuSeries {
            timestamps,
            total_cpu_time,
            user_space_cpu_time,
            kernel_cpu_time,
            run_periods,
            throttled_periods,
            total_throttled_time,
        } = self;
        push_sample(
            timestamps,
            [
                total_cpu_time,
                user_space_cpu_time,
                kernel_cpu_time,
                run_periods,
                throttled_periods,
                total_throttled_time,
            ],
            timestamp,
            values,
        )
    }
}

impl MemorySeries {
    pub fn variable(&self, name: &str) -> Option<&[u64]> {
        match name {
            "anonymous_memory" => Some(&self.anonymous_memory),
            "file_system_cache_memory" => Some(&self.file_system_cache_memory),
            "kernel_memory" => Some(&self.kernel_memory),
            _ => None,
        }
    }

    fn push(&mut self, timestamp: u64, values: [u64; 3]) -> bool {
        let MemorySeries {
            timestamps,
            anonymous_memory,
            file_system_cache_memory,
            kernel_memory,
        } = self;
        push_sample(
            timestamps,
            [anonymous_memory, file_system_cache_memory, kernel_memory],
            timestamp,
            values,
        )
    }
}

impl IoDeviceSeries {
    pub fn variable(&self, name: &str) -> Option<&[u64]> {
        match name {
            "read_bytes" => Some(&self.read_bytes),
            "written_bytes" => Some(&self.written_bytes),
            "read_io_ops" => Some(&self.read_io_ops),
            "write_io_ops" => Some(&self.write_io_ops),
            _ => None,
        }
    }

    fn push(&mut self, timestamp: u64, values: [u64; 4]) -> bool {
        let IoDeviceSeries {
            timestamps,
            read_bytes,
            written_bytes,
            read_io_ops,
            write_io_ops,
            ..
        } = self;
        push_sample(
            timestamps,
            [read_bytes, written_bytes, read_io_ops, write_io_ops],
            timestamp,
            values,
        )
    }
}

// Keys in the order of the series fields they fill.

const CPU_KEYS: [&str; 6] = [
    "usage_usec",
    "user_usec",
    "system_usec",
    "nr_periods",
    "nr_throttled",
    "throttled_usec",
];

const MEMORY_KEYS: [&str; 3] = ["anon", "file", "kernel"];

const IO_KEYS: [&str; 4] = ["rbytes", "wbytes", "rios", "wios"];

/// Append a sample to a set of parallel series sharing `timestamps`, or sum it into the last sample
/// if it has the same timestamp.  Returns false if the timestamp would go backwards.

fn push_sample<const N: usize>(
    timestamps: &mut Vec<u64>,
    fields: [&mut Vec<u64>; N],
    timestamp: u64,
    values: [u64; N],
) -> bool {
    match timestamps.last().copied() {
        Some(last) if last > timestamp => false,
        Some(last) if last == timestamp => {
            for (field, v) in fields.into_iter().zip(values) {
                if let Some(x) = field.last_mut() {
                    *x = x.saturating_add(v);
                }
            }
            true
        }
        _ => {
            timestamps.push(timestamp);
            for (field, v) in fields.into_iter().zip(values) {
                field.push(v);
            }
            true
        }
    }
}

#[derive(Debug, Default)]
struct Header {
    // (container id, name)
    containers: Vec<(String, String)>,
    // major:minor -> (name, size)
    devices: BTreeMap<String, (String, u64)>,
}

/// Map block groups onto monitored group names, per origin.

struct GroupResolver<'a> {
    origin: Origin,
    config: &'a EvalConfig,
}

impl<'a> GroupResolver<'a> {
    fn resolve(&self, header: &Header, group: &str) -> String {
        match self.origin {
            Origin::Sp => {
                for name in &self.config.sp_groups {
                    if group.contains(name.as_str()) {
                        return name.clone();
                    }
                }
                self.config.sp_catchall.clone()
            }
            Origin::Idp => {
                // Compose-style names such as keycloak-keycloak-1 carry the monitored name.
                for (id, name) in &header.containers {
                    if !group.contains(id.as_str()) {
                        continue;
                    }
                    if let Some(c) = self
                        .config
                        .idp_containers
                        .iter()
                        .find(|c| name.contains(c.as_str()))
                    {
                        return c.clone();
                    }
                }
                self.config.idp_catchall.clone()
            }
        }
    }
}

/// Lines of a chunk, with 1-based line numbers.

type Chunk<'a> = Vec<(usize, &'a str)>;

fn split_chunks(text: &str) -> Vec<Chunk<'_>> {
    let mut chunks = vec![];
    let mut current: Chunk = vec![];
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == DELIMITER {
            if !current.is_empty() {
                chunks.push(current);
                current = vec![];
            }
            continue;
        }
        current.push((lineno + 1, line));
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn is_directive(line: &str) -> bool {
    line.starts_with("container ") || line.starts_with("device ")
}

fn parse_u64(artifact: &str, lineno: usize, what: &str, s: &str) -> Result<u64> {
    s.parse::<u64>()
        .map_err(|_| Error::malformed(artifact, lineno, format!("Bad {what} '{s}'")))
}

fn parse_header(artifact: &str, chunk: &Chunk) -> Result<Header> {
    let mut header = Header::default();
    for (lineno, line) in chunk {
        let fields = line.split_whitespace().collect::<Vec<&str>>();
        match fields.as_slice() {
            ["container", id, name @ ..] if !name.is_empty() => {
                header.containers.push((id.to_string(), name.join(" ")));
            }
            ["device", dev, name, size] => {
                let size = parse_u64(artifact, *lineno, "device size", size)?;
                header
                    .devices
                    .insert(dev.to_string(), (name.to_string(), size));
            }
            _ => {
                return Err(Error::malformed(
                    artifact,
                    *lineno,
                    format!("Bad header directive '{line}'"),
                ))
            }
        }
    }
    Ok(header)
}

/// Parse `<key> <value>` lines into values ordered as `keys`, missing keys as 0.

fn parse_keyed<const N: usize>(
    artifact: &str,
    lines: &[(usize, &str)],
    keys: &[&str; N],
) -> Result<[u64; N]> {
    let mut values = [0u64; N];
    for (lineno, line) in lines {
        let mut fields = line.split_whitespace();
        let (key, value) = match (fields.next(), fields.next(), fields.next()) {
            (Some(k), Some(v), None) => (k, v),
            _ => {
                tracing::warn!("{artifact}:{lineno}: ignoring unrecognized line '{line}'");
                continue;
            }
        };
        if let Some(ix) = keys.iter().position(|k| *k == key) {
            values[ix] = parse_u64(artifact, *lineno, key, value)?;
        }
    }
    Ok(values)
}

/// Transform the text of the raw resmon record `artifact`, taken at `origin`.

pub fn transform_resmon_record(
    origin: Origin,
    config: &EvalConfig,
    artifact: &str,
    text: &str,
) -> Result<ResourceRecordSet> {
    let resolver = GroupResolver { origin, config };
    let mut chunks = split_chunks(text).into_iter().peekable();
    let header = match chunks.peek() {
        Some(first) if is_directive(first[0].1) => {
            let h = parse_header(artifact, first)?;
            chunks.next();
            h
        }
        _ => Header::default(),
    };

    let mut records = ResourceRecordSet::default();
    for chunk in chunks {
        let (lineno, first) = chunk[0];
        let (group, kind, timestamp) = match first.split_whitespace().collect::<Vec<&str>>()[..] {
            [group, kind, ts] => match ts.parse::<u64>() {
                Ok(ts) => (group, kind, ts),
                Err(_) => {
                    return Err(Error::malformed(
                        artifact,
                        lineno,
                        format!("Bad timestamp in block header '{first}'"),
                    ))
                }
            },
            _ => {
                return Err(Error::malformed(
                    artifact,
                    lineno,
                    format!("Expected '<group> <kind> <timestamp>', found '{first}'"),
                ))
            }
        };
        let name = resolver.resolve(&header, group);
        let body = &chunk[1..];
        let ok = match kind {
            "cpu" => {
                let values = parse_keyed(artifact, body, &CPU_KEYS)?;
                records.groups.entry(name).or_default().cpu.push(timestamp, values)
            }
            "memory" => {
                let values = parse_keyed(artifact, body, &MEMORY_KEYS)?;
                records
                    .groups
                    .entry(name)
                    .or_default()
                    .memory
                    .push(timestamp, values)
            }
            "io" => {
                let snapshot = records.groups.entry(name).or_default();
                let mut ok = true;
                for (lineno, line) in body {
                    let mut fields = line.split_whitespace();
                    let dev = match fields.next() {
                        Some(d) => d,
                        None => continue,
                    };
                    let mut values = [0u64; 4];
                    for kv in fields {
                        if let Some((k, v)) = kv.split_once('=') {
                            if let Some(ix) = IO_KEYS.iter().position(|x| *x == k) {
                                values[ix] = parse_u64(artifact, *lineno, k, v)?;
                            }
                        }
                    }
                    let series = snapshot.io.entry(dev.to_string()).or_insert_with(|| {
                        let (name, size) = header
                            .devices
                            .get(dev)
                            .cloned()
                            .unwrap_or_else(|| (dev.to_string(), 0));
                        IoDeviceSeries {
                            name,
                            size,
                            ..Default::default()
                        }
                    });
                    if !series.push(timestamp, values) {
                        ok = false;
                    }
                }
                ok
            }
            _ => {
                return Err(Error::malformed(
                    artifact,
                    lineno,
                    format!("Unknown block kind '{kind}'"),
                ))
            }
        };
        if !ok {
            return Err(Error::malformed(
                artifact,
                lineno,
                format!("Timestamp {timestamp} goes backwards"),
            ));
        }
    }
    Ok(records)
}

pub fn parse_resource_records(artifact: &str, text: &str) -> Result<ResourceRecordSet> {
    serde_json::from_str::<ResourceRecordSet>(text).map_err(|e| Error::malformed_json(artifact, e))
}

pub fn serialize_resource_records(records: &ResourceRecordSet) -> Result<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

#[cfg(test)]
fn fixture(name: &str) -> String {
    std::fs::read_to_string(format!("../tests/evallog/{name}")).unwrap()
}

#[test]
fn test_sp_record() {
    let conf = EvalConfig::default();
    let name = "oidc-eval-60-2-sp-resmon-1.txt";
    let r = transform_resmon_record(Origin::Sp, &conf, name, &fixture(name)).unwrap();
    assert!(r.groups.keys().collect::<Vec<&String>>() == vec!["eval.slice", "gunicorn", "nginx"]);

    let nginx = &r.groups["nginx"];
    assert!(nginx.cpu.timestamps == vec![1709287200000000000, 1709287201000000000]);
    assert!(nginx.cpu.total_cpu_time == vec![51200, 53700]);
    // Throttling counters absent in the first block.
    assert!(nginx.cpu.throttled_periods == vec![0, 2]);
    assert!(nginx.memory.anonymous_memory == vec![4194304, 4202496]);
    let sda = &nginx.io["8:0"];
    assert!(sda.name == "sda");
    assert!(sda.size == 34359738368);
    assert!(sda.read_bytes == vec![0, 4096]);

    // Header-only cpu block while frozen: every field gets a 0 at that timestamp.
    let gunicorn = &r.groups["gunicorn"];
    assert!(gunicorn.cpu.timestamps.len() == 2);
    assert!(gunicorn.cpu.total_cpu_time == vec![880000, 0]);
    assert!(gunicorn.cpu.user_space_cpu_time == vec![700000, 0]);
    assert!(gunicorn.cpu.kernel_cpu_time == vec![180000, 0]);
    assert!(gunicorn.cpu.run_periods == vec![120, 0]);
    assert!(gunicorn.cpu.throttled_periods == vec![7, 0]);
    assert!(gunicorn.cpu.total_throttled_time == vec![35000, 0]);
    // Device never seen for this group.
    assert!(gunicorn.io.is_empty());

    // Unknown device, not in the header.
    let slice = &r.groups["eval.slice"];
    assert!(slice.io["259:0"].name == "259:0");
    assert!(slice.io["259:0"].size == 0);
}

#[test]
fn test_idp_record() {
    let conf = EvalConfig::default();
    let name = "oidc-eval-60-2-idp-resmon-1.txt";
    let r = transform_resmon_record(Origin::Idp, &conf, name, &fixture(name)).unwrap();
    assert!(
        r.groups.keys().collect::<Vec<&String>>() == vec!["caddy", "docker", "keycloak", "postgres"]
    );
    // Two unmonitored containers at the same timestamp roll up into one catch-all sample.
    let docker = &r.groups["docker"];
    assert!(docker.memory.timestamps == vec![1709287200500000000]);
    assert!(docker.memory.anonymous_memory == vec![3000]);
    assert!(r.groups["keycloak"].memory.kernel_memory == vec![65536]);
}

#[test]
fn test_idp_compose_names() {
    let conf = EvalConfig::default();
    let text = "container 3f2a keycloak-keycloak-1\n\
                container 9b8c eval_postgres_1\n\
                container 77aa eval_redis_1\n\
                ---\n\
                docker-3f2a99.scope memory 10\nanon 1\n---\n\
                docker-9b8c00.scope memory 10\nanon 2\n---\n\
                docker-77aa11.scope memory 10\nanon 4\n---\n";
    let r = transform_resmon_record(Origin::Idp, &conf, "idp.txt", text).unwrap();
    assert!(r.groups.keys().collect::<Vec<&String>>() == vec!["docker", "keycloak", "postgres"]);
    assert!(r.groups["keycloak"].memory.anonymous_memory == vec![1]);
    assert!(r.groups["postgres"].memory.anonymous_memory == vec![2]);
    assert!(r.groups["docker"].memory.anonymous_memory == vec![4]);
}

#[test]
fn test_malformed_records() {
    let conf = EvalConfig::default();
    let bad_header = "nginx.service cpu\nusage_usec 1\n---\n";
    let e = transform_resmon_record(Origin::Sp, &conf, "x.txt", bad_header).unwrap_err();
    assert!(e.is_malformed());

    let bad_ts = "nginx.service cpu soon\n---\n";
    assert!(transform_resmon_record(Origin::Sp, &conf, "x.txt", bad_ts).is_err());

    let bad_kind = "nginx.service swap 10\n---\n";
    assert!(transform_resmon_record(Origin::Sp, &conf, "x.txt", bad_kind).is_err());

    let bad_value = "nginx.service memory 10\nanon lots\n---\n";
    assert!(transform_resmon_record(Origin::Sp, &conf, "x.txt", bad_value).is_err());

    let backwards = "nginx.service memory 10\nanon 1\n---\nnginx.service memory 9\nanon 1\n---\n";
    match transform_resmon_record(Origin::Sp, &conf, "x.txt", backwards) {
        Err(Error::Malformed { line, .. }) => assert!(line == 4),
        _ => panic!("Expected a malformed-artifact error"),
    }
}

#[test]
fn test_record_json() {
    let conf = EvalConfig::default();
    let text = "nginx.service memory 10\nanon 1\nfile 2\nkernel 3\n---\n";
    let r = transform_resmon_record(Origin::Sp, &conf, "x.txt", text).unwrap();
    let s = serialize_resource_records(&r).unwrap();
    let v: serde_json::Value = serde_json::from_str(&s).unwrap();
    assert!(v["nginx"]["memory"]["file_system_cache_memory"][0] == 2);
    assert!(v["nginx"]["cpu"]["timestamps"].as_array().unwrap().is_empty());
    assert!(parse_resource_records("x.json", &s).unwrap() == r);
}
