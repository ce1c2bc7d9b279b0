/// The artifacts of an SSO evaluation are produced per *cycle*: one run of the login scenario for
/// a fixed *configuration* (protocol, test duration, user count).  Each cycle leaves a raw timing
/// log from the service provider, a user-time record from the simulated browsers, and resource
/// records (resmon) from both the service provider (SP) and the identity provider (IdP).
///
/// Timing logs are written by many concurrent logins and their lines interleave without any user
/// identity.  A *slot* is therefore "the Nth user to be redirected in this cycle", not a particular
/// physical test user.  Resource records are periodic snapshots of control-group accounting that
/// may be partial when a group has been throttled or frozen.
///
/// This library turns those artifacts into aggregates that can be compared across
/// configurations.  The pipeline is:
///
/// - Find the artifacts of a configuration in an artifact directory, ignoring everything else
///   (tree.rs).
///
/// - Classify timing-log lines and transform a raw log into per-slot phase records (classify.rs,
///   timinglog.rs); transform raw resource records into per-group time series (resmon.rs).
///
/// - Gate every slot of every cycle on completeness and outcome (gate.rs), and accumulate the
///   accepted records and the failures into the aggregates (aggregate.rs, usertime.rs,
///   resources.rs).
///
/// - Derive metrics and tables from the aggregates (derived.rs, tables.rs, stats.rs).
///
/// There are two fundamental invariants:
///
/// - every slot 1..user_count is present in an aggregate, and for every slot the number of
///   accepted samples plus the number of failed measurements equals the number of cycles ingested
///
/// - ingesting the same ordered set of artifacts always yields the same aggregate, byte for byte
///   once serialized
///
/// Per-slot rejections are data, not errors.  A malformed artifact is an error and stops the
/// ingestion of the configuration.
mod aggregate;
mod classify;
mod derived;
mod error;
mod gate;
mod phases;
mod records;
mod resmon;
mod resources;
mod stats;
mod tables;
mod timinglog;
mod tree;
mod usertime;

// The library's error type: malformed artifacts, I/O, JSON, configuration and query errors.

pub use error::Error;
pub use error::Result;

// Login phases and the phases of each protocol.

pub use phases::protocol_phases;
pub use phases::Phase;

// Per-cycle records and the slot keys that index them.

pub use records::CycleLog;
pub use records::PhaseRecord;
pub use records::RawUserTimeCycle;
pub use records::SlotKey;
pub use records::UserTimeRecord;

// Field names of user-time records.

pub use records::LOGIN_FINISH_TIME;
pub use records::LOGIN_START_TIME;
pub use records::PROTECTED_RESOURCE;
pub use records::TOTAL_LOGIN_TIME;

// Classify a single timing-log line.

pub use classify::classify_line;
pub use classify::LineClass;

// Transform a raw timing log into a CycleLog, with the standard or a custom slot attribution, and
// read and write the serialized CycleLog.

pub use timinglog::parse_cycle_log;
pub use timinglog::serialize_cycle_log;
pub use timinglog::transform_timing_log;
pub use timinglog::transform_timing_log_with;
pub use timinglog::RunningCounters;
pub use timinglog::SlotAttribution;

// Transform a raw resmon record into a ResourceRecordSet, and read and write the serialized form.

pub use resmon::parse_resource_records;
pub use resmon::serialize_resource_records;
pub use resmon::transform_resmon_record;
pub use resmon::CpuSeries;
pub use resmon::IoDeviceSeries;
pub use resmon::MemorySeries;
pub use resmon::Resource;
pub use resmon::ResourceRecordSet;
pub use resmon::ResourceSnapshot;

// The validity gate.

pub use gate::check_phase_record;
pub use gate::check_user_time_record;
pub use gate::RejectReason;
pub use gate::RequiredKeys;
pub use gate::Verdict;

// Timing aggregates.

pub use aggregate::aggregate_timing;
pub use aggregate::Accumulator;
pub use aggregate::Aggregate;
pub use aggregate::CycleOutcome;
pub use aggregate::SlotSeries;

// User-time aggregates.

pub use usertime::aggregate_user_time;
pub use usertime::parse_user_time_cycle;
pub use usertime::UserTimeAccumulator;
pub use usertime::UserTimeAggregate;
pub use usertime::UserTimeSeries;

// Resource records per cycle, and metric queries over them.

pub use resources::resource_table;
pub use resources::Method;
pub use resources::MetricQuery;
pub use resources::ResourceAccumulator;
pub use resources::ResourceCycle;
pub use resources::ResourceRow;

// Derived metrics, units, and realignment of per-slot sequences with their failures.

pub use derived::convert_units;
pub use derived::delta;
pub use derived::percentage;
pub use derived::realign;
pub use derived::total;
pub use derived::Unit;

// Per-(user, cycle) tables.

pub use tables::outcome_table;
pub use tables::phase_table;
pub use tables::user_time_table;
pub use tables::TableRow;

// Summary statistics.

pub use stats::phase_stats;
pub use stats::summarize;
pub use stats::user_time_stats;
pub use stats::Summary;

// Find artifacts in an artifact directory.

pub use tree::find_all_artifacts;
pub use tree::find_artifacts;
pub use tree::Artifact;
pub use tree::ArtifactClass;
