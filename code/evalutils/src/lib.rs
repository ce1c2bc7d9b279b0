// Misc utilities useful to both evallog and evalyze.

mod configs;
mod dates;
mod naming;

// Settings for one evaluation setup: artifact directory, accepted login outcomes, and the names of
// the monitored groups on either side.

pub use configs::EvalConfig;

// Read the settings from a file or from a string.

pub use configs::parse_eval_config;
pub use configs::read_eval_config;

// Nanosecond timestamps from resource records.

pub use dates::format_nanos;
pub use dates::seconds_since;
pub use dates::NANOS_PER_SECOND;

// The login protocols under comparison, and the two ends resources are measured at.

pub use naming::Origin;
pub use naming::Protocol;

// (protocol, test duration, user count), identifying one comparable series of cycles.

pub use naming::TestConfiguration;
pub use naming::MAX_USERS;

// The artifact grammar: kinds of artifact, and a matcher for the artifacts of one series.

pub use naming::ArtifactKind;
pub use naming::ArtifactMatcher;

// Recover a cycle id from the end of an artifact name.

pub use naming::trailing_cycle_id;
