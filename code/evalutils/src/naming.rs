/// File names of the artifacts written by the capture pipeline.
///
/// Every artifact of one evaluation series shares the prefix `<protocol>-eval-<duration>-<users>`.
/// Cycle artifacts end in a decimal cycle id.  The capture side assigns the id when it creates the
/// file, by counting the files of the same kind that are already present, so the id orders the
/// artifacts but says nothing about when the cycle actually ran.
///
///   <prefix>-<id>.log                    raw timing log
///   <prefix>-<id>.json                   timing log, serialized per-cycle form
///   <prefix>-user-time-<id>.json         user-time record
///   <prefix>-<origin>-resmon-<id>.txt    raw resource record, origin is `sp` or `idp`
///   <prefix>-<origin>-resmon-<id>.json   resource record, serialized form
///   <prefix>-aggregate.json              persisted timing aggregate
///   <prefix>-user-time-aggregate.json    persisted user-time aggregate
///
/// Anything else in an artifact directory is somebody else's file and must be left alone.
use anyhow::{bail, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The largest number of simulated users in one evaluation series.

pub const MAX_USERS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Saml,
    Oidc,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Saml => "saml",
            Protocol::Oidc => "oidc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Protocol> {
        match s.to_ascii_lowercase().as_str() {
            "saml" => Ok(Protocol::Saml),
            "oidc" => Ok(Protocol::Oidc),
            _ => bail!("Unknown protocol '{s}', expected saml or oidc"),
        }
    }
}

/// Which end of the login the resource record was taken at.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Sp,
    Idp,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Sp => "sp",
            Origin::Idp => "idp",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Origin {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Origin> {
        match s.to_ascii_lowercase().as_str() {
            "sp" => Ok(Origin::Sp),
            "idp" => Ok(Origin::Idp),
            _ => bail!("Unknown origin '{s}', expected sp or idp"),
        }
    }
}

/// One comparable evaluation series.  Construct with `new` so that the user count is checked.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestConfiguration {
    pub protocol: Protocol,
    pub test_duration: u32,
    pub user_count: u32,
}

impl TestConfiguration {
    pub fn new(protocol: Protocol, test_duration: u32, user_count: u32) -> Result<TestConfiguration> {
        if user_count == 0 || user_count > MAX_USERS {
            bail!("The user count must be in the range 1..{MAX_USERS}, not {user_count}");
        }
        Ok(TestConfiguration {
            protocol,
            test_duration,
            user_count,
        })
    }

    /// The name prefix shared by all artifacts of this series, eg `oidc-eval-60-10`.

    pub fn prefix(&self) -> String {
        format!(
            "{}-eval-{}-{}",
            self.protocol, self.test_duration, self.user_count
        )
    }

    pub fn artifact_name(&self, kind: ArtifactKind, cycle_id: u32) -> String {
        let prefix = self.prefix();
        match kind {
            ArtifactKind::TimingLog => format!("{prefix}-{cycle_id}.log"),
            ArtifactKind::TimingJson => format!("{prefix}-{cycle_id}.json"),
            ArtifactKind::UserTime => format!("{prefix}-user-time-{cycle_id}.json"),
            ArtifactKind::ResmonRaw(origin) => format!("{prefix}-{origin}-resmon-{cycle_id}.txt"),
            ArtifactKind::ResmonJson(origin) => {
                format!("{prefix}-{origin}-resmon-{cycle_id}.json")
            }
        }
    }

    pub fn aggregate_name(&self) -> String {
        format!("{}-aggregate.json", self.prefix())
    }

    pub fn user_time_aggregate_name(&self) -> String {
        format!("{}-user-time-aggregate.json", self.prefix())
    }

    /// The directory an archived series is moved into, for the `n`th archive of that series.

    pub fn storage_dir_name(&self, n: u32) -> String {
        format!("analyze_evalstorage_{}-{n}", self.prefix())
    }
}

impl fmt::Display for TestConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    TimingLog,
    TimingJson,
    UserTime,
    ResmonRaw(Origin),
    ResmonJson(Origin),
}

impl ArtifactKind {
    /// True for the artifacts that are the serialized form of some raw artifact.

    pub fn is_serialized(&self) -> bool {
        matches!(self, ArtifactKind::TimingJson | ArtifactKind::ResmonJson(_))
    }

    pub fn origin(&self) -> Option<Origin> {
        match self {
            ArtifactKind::ResmonRaw(o) | ArtifactKind::ResmonJson(o) => Some(*o),
            _ => None,
        }
    }
}

/// Recognizes the cycle artifacts of exactly one series.  The prefix is anchored and followed by
/// `-`, so `oidc-eval-60-1` will not pick up the artifacts of `oidc-eval-60-10`.

pub struct ArtifactMatcher {
    re: Regex,
}

impl ArtifactMatcher {
    pub fn new(config: &TestConfiguration) -> Result<ArtifactMatcher> {
        let re = Regex::new(&format!(
            r"^{}-(?:(user-time)-|(sp|idp)-resmon-)?(\d+)\.(log|json|txt)$",
            regex::escape(&config.prefix())
        ))?;
        Ok(ArtifactMatcher { re })
    }

    /// Return the kind and cycle id of `file_name`, or None if it is not a cycle artifact of this
    /// series.

    pub fn classify(&self, file_name: &str) -> Option<(ArtifactKind, u32)> {
        let caps = self.re.captures(file_name)?;
        let cycle_id = caps.get(3)?.as_str().parse::<u32>().ok()?;
        let ext = caps.get(4)?.as_str();
        let kind = match (caps.get(1).is_some(), caps.get(2).map(|m| m.as_str()), ext) {
            (false, None, "log") => ArtifactKind::TimingLog,
            (false, None, "json") => ArtifactKind::TimingJson,
            (true, None, "json") => ArtifactKind::UserTime,
            (false, Some(origin), "txt") => ArtifactKind::ResmonRaw(origin.parse().ok()?),
            (false, Some(origin), "json") => ArtifactKind::ResmonJson(origin.parse().ok()?),
            _ => return None,
        };
        Some((kind, cycle_id))
    }
}

/// Recover the cycle id from the trailing numeric suffix of an artifact name, ignoring any
/// extension.  This is how a failure id is mapped back to its position in the cycle order.

pub fn trailing_cycle_id(name: &str) -> Option<u32> {
    let stem = match name.rfind('.') {
        Some(dot) => &name[..dot],
        None => name,
    };
    let digits = stem.len() - stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    stem[stem.len() - digits..].parse::<u32>().ok()
}

#[test]
fn test_prefix_and_names() {
    let c = TestConfiguration::new(Protocol::Oidc, 60, 10).unwrap();
    assert!(c.prefix() == "oidc-eval-60-10");
    assert!(c.artifact_name(ArtifactKind::TimingJson, 3) == "oidc-eval-60-10-3.json");
    assert!(c.artifact_name(ArtifactKind::UserTime, 3) == "oidc-eval-60-10-user-time-3.json");
    assert!(
        c.artifact_name(ArtifactKind::ResmonRaw(Origin::Idp), 12)
            == "oidc-eval-60-10-idp-resmon-12.txt"
    );
    assert!(c.aggregate_name() == "oidc-eval-60-10-aggregate.json");
    assert!(c.storage_dir_name(2) == "analyze_evalstorage_oidc-eval-60-10-2");
}

#[test]
fn test_user_count_bounds() {
    assert!(TestConfiguration::new(Protocol::Saml, 5, 0).is_err());
    assert!(TestConfiguration::new(Protocol::Saml, 5, 1001).is_err());
    assert!(TestConfiguration::new(Protocol::Saml, 5, 1000).is_ok());
}

#[test]
fn test_matcher() {
    let c = TestConfiguration::new(Protocol::Saml, 300, 1).unwrap();
    let m = ArtifactMatcher::new(&c).unwrap();
    assert!(m.classify("saml-eval-300-1-7.log") == Some((ArtifactKind::TimingLog, 7)));
    assert!(m.classify("saml-eval-300-1-7.json") == Some((ArtifactKind::TimingJson, 7)));
    assert!(m.classify("saml-eval-300-1-user-time-2.json") == Some((ArtifactKind::UserTime, 2)));
    assert!(
        m.classify("saml-eval-300-1-sp-resmon-4.txt")
            == Some((ArtifactKind::ResmonRaw(Origin::Sp), 4))
    );
    assert!(
        m.classify("saml-eval-300-1-idp-resmon-4.json")
            == Some((ArtifactKind::ResmonJson(Origin::Idp), 4))
    );

    // Other series, other kinds, and the aggregates themselves.
    assert!(m.classify("saml-eval-300-10-7.json").is_none());
    assert!(m.classify("oidc-eval-300-1-7.json").is_none());
    assert!(m.classify("saml-eval-300-1-aggregate.json").is_none());
    assert!(m.classify("saml-eval-300-1-user-time-aggregate.json").is_none());
    assert!(m.classify("saml-eval-300-1-user-time-2.txt").is_none());
    assert!(m.classify("saml-eval-300-1-sp-resmon-4.log").is_none());
    assert!(m.classify("xsaml-eval-300-1-7.json").is_none());
    assert!(m.classify("saml-eval-300-1-7.json.bak").is_none());
}

#[test]
fn test_trailing_cycle_id() {
    assert!(trailing_cycle_id("oidc-eval-60-10-3.json") == Some(3));
    assert!(trailing_cycle_id("oidc-eval-60-10-user-time-12.json") == Some(12));
    assert!(trailing_cycle_id("oidc-eval-60-10-12") == Some(12));
    assert!(trailing_cycle_id("oidc-eval-60-10-aggregate.json").is_none());
    assert!(trailing_cycle_id("").is_none());
}

#[test]
fn test_protocol_parse() {
    assert!("OIDC".parse::<Protocol>().unwrap() == Protocol::Oidc);
    assert!("saml".parse::<Protocol>().unwrap() == Protocol::Saml);
    assert!("ws-fed".parse::<Protocol>().is_err());
    assert!("idp".parse::<Origin>().unwrap() == Origin::Idp);
}
