/// Transform one raw timing log (one cycle, all users) into a per-slot CycleLog, and read and
/// write the serialized form of that CycleLog.
///
/// Log lines from concurrent logins interleave arbitrarily and carry no user identity, so phase
/// samples cannot be correlated with the redirect that opened their login.  Instead every phase
/// has its own running counter and the Nth sample of a phase goes to slot N.  When logins overlap
/// and finish out of order, a phase duration can end up in the wrong slot.  That skew is accepted:
/// it is a property of the data, and "fixing" it heuristically could hide real data loss.  The
/// attribution is isolated behind `SlotAttribution` so that a correlating implementation can be
/// slotted in later.
use crate::classify::{classify_line, LineClass};
use crate::error::{Error, Result};
use crate::phases::Phase;
use crate::records::{CycleLog, PhaseRecord, SlotKey};

use evalutils::Protocol;
use std::collections::HashMap;

/// Assigns lines to slots.

pub trait SlotAttribution {
    /// A redirect was seen; return the slot it opens.
    fn open_slot(&mut self) -> SlotKey;

    /// A sample of `phase` was seen; return the slot it belongs to.
    fn slot_for_phase(&mut self, phase: Phase) -> SlotKey;
}

/// Attribute phase samples to slots by running counter per phase, not by derived identity.

#[derive(Debug, Default)]
pub struct RunningCounters {
    redirects: u32,
    phases: HashMap<Phase, u32>,
}

impl RunningCounters {
    pub fn new() -> RunningCounters {
        Default::default()
    }
}

impl SlotAttribution for RunningCounters {
    fn open_slot(&mut self) -> SlotKey {
        self.redirects += 1;
        SlotKey(self.redirects)
    }

    fn slot_for_phase(&mut self, phase: Phase) -> SlotKey {
        let n = self.phases.entry(phase).or_insert(0);
        *n += 1;
        SlotKey(*n)
    }
}

/// Transform the text of the raw log `artifact` with the standard running-counter attribution.

pub fn transform_timing_log(protocol: Protocol, artifact: &str, text: &str) -> Result<CycleLog> {
    transform_timing_log_with(protocol, artifact, text, &mut RunningCounters::new())
}

/// Lines are processed strictly in file order.  A line whose duration cannot be read makes the
/// whole artifact malformed.
///
/// A phase sample for a slot that no redirect has opened (yet) creates the slot's record on the
/// spot; such a record lacks `redirect_time` and is rejected as incomplete unless a later redirect
/// fills it in.

pub fn transform_timing_log_with(
    protocol: Protocol,
    artifact: &str,
    text: &str,
    attribution: &mut dyn SlotAttribution,
) -> Result<CycleLog> {
    let mut log = CycleLog::new();
    for (lineno, line) in text.lines().enumerate() {
        let class = classify_line(protocol, line)
            .map_err(|reason| Error::malformed(artifact, lineno + 1, reason))?;
        match class {
            LineClass::Ignore => {}
            LineClass::NewUserRedirect(duration) => {
                let slot = attribution.open_slot();
                log.entry(slot)
                    .or_insert_with(PhaseRecord::new)
                    .set(Phase::Redirect.key(), duration);
            }
            LineClass::PhaseSample(phase, duration) => {
                let slot = attribution.slot_for_phase(phase);
                log.entry(slot)
                    .or_insert_with(PhaseRecord::new)
                    .set(phase.key(), duration);
            }
        }
    }
    Ok(log)
}

/// Parse the serialized form of a CycleLog.  Durations are held to the same range as in the raw
/// log.  A bad duration has no line of its own, so it is reported at line 0.

pub fn parse_cycle_log(artifact: &str, text: &str) -> Result<CycleLog> {
    let log = serde_json::from_str::<CycleLog>(text)
        .map_err(|e| Error::malformed_json(artifact, e))?;
    for (slot, record) in &log {
        for (key, d) in &record.fields {
            if !d.is_finite() || *d < 0.0 {
                return Err(Error::malformed(
                    artifact,
                    0,
                    format!("{slot}: {key} out of range: {d}"),
                ));
            }
        }
    }
    Ok(log)
}

/// Serialized form of a CycleLog: pretty-printed JSON with slots in numeric order.

pub fn serialize_cycle_log(log: &CycleLog) -> Result<String> {
    Ok(serde_json::to_string_pretty(log)?)
}

#[cfg(test)]
fn fixture(name: &str) -> String {
    std::fs::read_to_string(format!("../tests/evallog/{name}")).unwrap()
}

#[test]
fn test_transform_oidc() {
    let log = transform_timing_log(
        Protocol::Oidc,
        "oidc-eval-60-2-1.log",
        &fixture("oidc-eval-60-2-1.log"),
    )
    .unwrap();
    assert!(log.len() == 2);
    let u1 = &log[&SlotKey(1)];
    assert!(u1.keys().count() == 5);
    assert!(u1.get("redirect_time") == Some(0.121));
    assert!(u1.get("get_access_token_time") == Some(0.053));
    assert!(u1.get("dispatch_time") == Some(1.204));
    let u2 = &log[&SlotKey(2)];
    assert!(u2.get("redirect_time") == Some(0.118));
    assert!(u2.get("complete_login_time") == Some(0.804));
}

#[test]
fn test_transform_incomplete() {
    let log = transform_timing_log(
        Protocol::Oidc,
        "oidc-eval-60-1-1.log",
        "2024-03-01 10:00:00,001 INFO oidc redirect 0.12\n\
         2024-03-01 10:00:00,101 INFO oidc get_access_token 0.05\n\
         2024-03-01 10:00:00,111 INFO oidc _decode_id_token 0.02\n",
    )
    .unwrap();
    assert!(log.len() == 1);
    let keys = log[&SlotKey(1)].keys().collect::<Vec<&str>>();
    assert!(keys == vec!["decode_id_token_time", "get_access_token_time", "redirect_time"]);
}

#[test]
fn test_transform_interleaved_skew() {
    // User 1 is redirected first but user 2 completes first.  The counters hand user 2's
    // complete_login duration to slot 1.
    let text = "INFO redirect 0.10\n\
                INFO redirect 0.20\n\
                INFO complete_login 2.00\n\
                INFO complete_login 9.00\n";
    let log = transform_timing_log(Protocol::Oidc, "x.log", text).unwrap();
    assert!(log[&SlotKey(1)].get("complete_login_time") == Some(2.0));
    assert!(log[&SlotKey(2)].get("complete_login_time") == Some(9.0));
}

#[test]
fn test_transform_lazy_slot() {
    // The sample arrives before its redirect, and there is a sample for a slot that is never
    // opened.
    let text = "INFO dispatch 0.5\n\
                INFO redirect 0.1\n\
                INFO dispatch 0.6\n";
    let log = transform_timing_log(Protocol::Oidc, "x.log", text).unwrap();
    assert!(log[&SlotKey(1)].get("dispatch_time") == Some(0.5));
    assert!(log[&SlotKey(1)].get("redirect_time") == Some(0.1));
    assert!(log[&SlotKey(2)].get("redirect_time").is_none());
    assert!(log[&SlotKey(2)].get("dispatch_time") == Some(0.6));
}

#[test]
fn test_transform_malformed() {
    let text = "DEBUG whatever\nINFO redirect 0.1\nINFO dispatch soon\n";
    match transform_timing_log(Protocol::Oidc, "oidc-eval-60-1-4.log", text) {
        Err(Error::Malformed { artifact, line, .. }) => {
            assert!(artifact == "oidc-eval-60-1-4.log");
            assert!(line == 3);
        }
        _ => panic!("Expected a malformed-artifact error"),
    }
}

#[test]
fn test_cycle_log_roundtrip_file() {
    let text = fixture("saml-eval-30-2-1.log");
    let log = transform_timing_log(Protocol::Saml, "saml-eval-30-2-1.log", &text).unwrap();
    assert!(log[&SlotKey(1)].get("finish_acs_dispatch_time") == Some(0.031));
    assert!(log[&SlotKey(2)].get("acs_dispatch_time") == Some(0.412));
    let s = serialize_cycle_log(&log).unwrap();
    assert!(parse_cycle_log("saml-eval-30-2-1.json", &s).unwrap() == log);
    assert!(parse_cycle_log("saml-eval-30-2-1.json", "{\"t_user_1\": [1]}")
        .unwrap_err()
        .is_malformed());
}

#[test]
fn test_cycle_log_negative_duration() {
    // Rejected in serialized form just as in the raw log.
    let json = r#"{"t_user_1": {"redirect_time": -3.5}}"#;
    assert!(parse_cycle_log("oidc-eval-60-1-1.json", json)
        .unwrap_err()
        .is_malformed());
    assert!(transform_timing_log(Protocol::Oidc, "oidc-eval-60-1-1.log", "INFO redirect -3.5\n")
        .unwrap_err()
        .is_malformed());
    let json = r#"{"t_user_1": {"redirect_time": 0.0}}"#;
    let log = parse_cycle_log("oidc-eval-60-1-1.json", json).unwrap();
    assert!(log[&SlotKey(1)].get("redirect_time") == Some(0.0));
}
