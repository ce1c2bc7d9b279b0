/// The validity gate decides, per slot and cycle, whether a record may enter an aggregate.
///
/// Rules, checked in order, first match wins:
///
/// 1. the slot has no record in the cycle: the user was never redirected -> Reject(Missing)
/// 2. the record's key-set is not exactly the required key-set -> Reject(Incomplete)
/// 3. (user-time records only) the outcome is not an allowed outcome -> Reject(InvalidOutcome)
/// 4. otherwise Accept
///
/// A Reject is a value, not an error.
use crate::phases::protocol_phases;
use crate::records::{
    PhaseRecord, LOGIN_FINISH_TIME, LOGIN_START_TIME, PROTECTED_RESOURCE,
};

use evalutils::Protocol;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Missing,
    Incomplete,
    InvalidOutcome,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectReason::Missing => "missing",
            RejectReason::Incomplete => "incomplete",
            RejectReason::InvalidOutcome => "invalid outcome",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        *self == Verdict::Accept
    }
}

/// An enumerated required key-set.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredKeys {
    keys: BTreeSet<&'static str>,
}

impl RequiredKeys {
    pub fn for_protocol(protocol: Protocol) -> RequiredKeys {
        RequiredKeys {
            keys: protocol_phases(protocol).iter().map(|p| p.key()).collect(),
        }
    }

    pub fn user_time() -> RequiredKeys {
        RequiredKeys {
            keys: [LOGIN_START_TIME, LOGIN_FINISH_TIME, PROTECTED_RESOURCE]
                .into_iter()
                .collect(),
        }
    }

    /// True iff `keys` yields exactly the required keys, each once.

    pub fn matches<'a>(&self, keys: impl Iterator<Item = &'a str>) -> bool {
        let mut n = 0;
        for k in keys {
            if !self.keys.contains(k) {
                return false;
            }
            n += 1;
        }
        n == self.keys.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.keys.iter().copied()
    }
}

pub fn check_phase_record(record: Option<&PhaseRecord>, required: &RequiredKeys) -> Verdict {
    match record {
        None => Verdict::Reject(RejectReason::Missing),
        Some(r) if !required.matches(r.keys()) => Verdict::Reject(RejectReason::Incomplete),
        Some(_) => Verdict::Accept,
    }
}

/// The record is the raw JSON object for the slot; the outcome must be a string equal to one of
/// `allowed_outcomes`.

pub fn check_user_time_record(
    record: Option<&serde_json::Map<String, serde_json::Value>>,
    required: &RequiredKeys,
    allowed_outcomes: &[String],
) -> Verdict {
    let r = match record {
        None => return Verdict::Reject(RejectReason::Missing),
        Some(r) => r,
    };
    if !required.matches(r.keys().map(|k| k.as_str())) {
        return Verdict::Reject(RejectReason::Incomplete);
    }
    match r.get(PROTECTED_RESOURCE) {
        Some(serde_json::Value::String(s)) if allowed_outcomes.iter().any(|o| o == s) => {
            Verdict::Accept
        }
        _ => Verdict::Reject(RejectReason::InvalidOutcome),
    }
}

#[cfg(test)]
use proptest::prelude::*;

#[cfg(test)]
fn full_oidc_record() -> PhaseRecord {
    let mut r = PhaseRecord::new();
    for p in protocol_phases(Protocol::Oidc) {
        r.set(p.key(), 0.5);
    }
    r
}

#[test]
fn test_phase_gate() {
    let req = RequiredKeys::for_protocol(Protocol::Oidc);
    assert!(check_phase_record(None, &req) == Verdict::Reject(RejectReason::Missing));

    let mut r = full_oidc_record();
    assert!(check_phase_record(Some(&r), &req) == Verdict::Accept);

    // Complete for OIDC is incomplete for SAML.
    let saml = RequiredKeys::for_protocol(Protocol::Saml);
    assert!(check_phase_record(Some(&r), &saml) == Verdict::Reject(RejectReason::Incomplete));

    r.set("extra_time", 1.0);
    assert!(check_phase_record(Some(&r), &req) == Verdict::Reject(RejectReason::Incomplete));

    let mut r = PhaseRecord::new();
    r.set("redirect_time", 0.12);
    r.set("get_access_token_time", 0.05);
    r.set("decode_id_token_time", 0.02);
    assert!(check_phase_record(Some(&r), &req) == Verdict::Reject(RejectReason::Incomplete));
    assert!(RejectReason::Incomplete.to_string() == "incomplete");
}

#[test]
fn test_user_time_gate() {
    let req = RequiredKeys::user_time();
    let allowed = vec!["True".to_string(), "False".to_string()];
    let rec = |v: serde_json::Value| v.as_object().unwrap().clone();

    let good = rec(serde_json::json!({
        "login_start_time": 1.0, "login_finish_time": 2.0, "protected_resource": "False"
    }));
    assert!(check_user_time_record(Some(&good), &req, &allowed) == Verdict::Accept);
    assert!(
        check_user_time_record(None, &req, &allowed) == Verdict::Reject(RejectReason::Missing)
    );

    let partial = rec(serde_json::json!({"login_start_time": 1.0, "protected_resource": "True"}));
    assert!(
        check_user_time_record(Some(&partial), &req, &allowed)
            == Verdict::Reject(RejectReason::Incomplete)
    );

    let bad = rec(serde_json::json!({
        "login_start_time": 1.0, "login_finish_time": 2.0, "protected_resource": "Timeout"
    }));
    assert!(
        check_user_time_record(Some(&bad), &req, &allowed)
            == Verdict::Reject(RejectReason::InvalidOutcome)
    );
    let not_a_string = rec(serde_json::json!({
        "login_start_time": 1.0, "login_finish_time": 2.0, "protected_resource": true
    }));
    assert!(
        check_user_time_record(Some(&not_a_string), &req, &allowed)
            == Verdict::Reject(RejectReason::InvalidOutcome)
    );
}

#[cfg(test)]
proptest! {
    // Accept iff the key-set is exactly the required set.
    #[test]
    fn prop_gate_exact_keyset(
        dropped in proptest::collection::vec(any::<bool>(), 5),
        extra in proptest::option::of("[a-z_]{1,12}"),
    ) {
        let req = RequiredKeys::for_protocol(Protocol::Saml);
        let mut r = PhaseRecord::new();
        for (p, d) in protocol_phases(Protocol::Saml).iter().zip(&dropped) {
            if !*d {
                r.set(p.key(), 1.0);
            }
        }
        if let Some(k) = &extra {
            r.set(k, 2.0);
        }
        let all_present = protocol_phases(Protocol::Saml)
            .iter()
            .zip(&dropped)
            .all(|(p, d)| !*d || extra.as_deref() == Some(p.key()));
        let no_foreign = extra.as_ref().map_or(true, |k| req.iter().any(|x| x == k.as_str()));
        let exact = all_present && no_foreign;
        prop_assert_eq!(check_phase_record(Some(&r), &req).is_accept(), exact);
    }
}
