/// Per-cycle records: the parsed content of one timing artifact and one user-time artifact.
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A slot is the Nth user to be redirected in a cycle's log, written `t_user_N`.  It is not
/// necessarily the same physical test user from one cycle to the next.  Slots order numerically,
/// so `t_user_2` comes before `t_user_10` everywhere, including in serialized output.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey(pub u32);

const SLOT_PREFIX: &str = "t_user_";

impl SlotKey {
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SLOT_PREFIX}{}", self.0)
    }
}

impl FromStr for SlotKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<SlotKey, String> {
        match s.strip_prefix(SLOT_PREFIX).map(|n| n.parse::<u32>()) {
            Some(Ok(n)) if n > 0 => Ok(SlotKey(n)),
            _ => Err(format!("Not a slot key: '{s}'")),
        }
    }
}

impl Serialize for SlotKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<SlotKey, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<SlotKey>().map_err(serde::de::Error::custom)
    }
}

/// One slot's phase durations for one cycle, keyed by phase key.  The map is open: a record read
/// from a serialized artifact may carry keys that are not phase keys at all, and the validity
/// gate has to see those to reject the record.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseRecord {
    pub fields: BTreeMap<String, f64>,
}

impl PhaseRecord {
    pub fn new() -> PhaseRecord {
        PhaseRecord {
            fields: BTreeMap::new(),
        }
    }

    /// Last write wins.

    pub fn set(&mut self, key: &str, duration: f64) {
        self.fields.insert(key.to_string(), duration);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.fields.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }
}

/// All slots of one timing artifact.

pub type CycleLog = BTreeMap<SlotKey, PhaseRecord>;

/// A user-time artifact as written by the capture side, before validation.  The fields are kept
/// as generic JSON values because the gate must judge the key-set before anything is decoded.

pub type RawUserTimeCycle = BTreeMap<SlotKey, serde_json::Map<String, serde_json::Value>>;

pub const LOGIN_START_TIME: &str = "login_start_time";
pub const LOGIN_FINISH_TIME: &str = "login_finish_time";
pub const PROTECTED_RESOURCE: &str = "protected_resource";
pub const TOTAL_LOGIN_TIME: &str = "total_login_time";

/// A validated user-time record.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTimeRecord {
    pub login_start_time: f64,
    pub login_finish_time: f64,
    pub protected_resource: String,
}

impl UserTimeRecord {
    pub fn total_login_time(&self) -> f64 {
        self.login_finish_time - self.login_start_time
    }
}

#[test]
fn test_slot_key() {
    assert!("t_user_12".parse::<SlotKey>() == Ok(SlotKey(12)));
    assert!("t_user_0".parse::<SlotKey>().is_err());
    assert!("user_1".parse::<SlotKey>().is_err());
    assert!("t_user_".parse::<SlotKey>().is_err());
    assert!(SlotKey(3).to_string() == "t_user_3");
    assert!(SlotKey(2) < SlotKey(10));
}

#[test]
fn test_cycle_log_json() {
    let mut log = CycleLog::new();
    let mut r = PhaseRecord::new();
    r.set("redirect_time", 0.25);
    log.insert(SlotKey(10), r.clone());
    log.insert(SlotKey(2), r);
    let s = serde_json::to_string(&log).unwrap();
    assert!(s == r#"{"t_user_2":{"redirect_time":0.25},"t_user_10":{"redirect_time":0.25}}"#);
    let back: CycleLog = serde_json::from_str(&s).unwrap();
    assert!(back == log);
    assert!(serde_json::from_str::<CycleLog>(r#"{"nobody":{}}"#).is_err());
}

#[test]
fn test_total_login_time() {
    let r = UserTimeRecord {
        login_start_time: 10.5,
        login_finish_time: 12.0,
        protected_resource: "True".to_string(),
    };
    assert!(r.total_login_time() == 1.5);
}
