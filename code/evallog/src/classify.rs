/// Classification of single raw timing-log lines.
///
/// The server logs one INFO line per measured phase per login, ending in the phase duration in
/// seconds.  Everything that is not INFO (debug output, request logging from other loggers) is
/// ignored.  A line containing `redirect` starts a new user.  Otherwise the line is matched
/// against the protocol's markers in table order; a marker matches when all of its substrings are
/// present.  For SAML the two dispatch phases are told apart by the view name, and the finishing
/// view is tested first since it is the more specific match.
use crate::phases::Phase;

use evalutils::Protocol;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineClass {
    Ignore,
    NewUserRedirect(f64),
    PhaseSample(Phase, f64),
}

const INFO_MARKER: &str = "INFO";
const REDIRECT_MARKER: &str = "redirect";

const OIDC_MARKERS: &[(Phase, &[&str])] = &[
    (Phase::GetAccessToken, &["get_access_token"]),
    (Phase::DecodeIdToken, &["_decode_id_token"]),
    (Phase::CompleteLogin, &["complete_login"]),
    (Phase::Dispatch, &["dispatch"]),
];

const SAML_MARKERS: &[(Phase, &[&str])] = &[
    (Phase::BuildAuth, &["build_auth"]),
    (Phase::FinishAcsDispatch, &["dispatch", ".FinishACSView"]),
    (Phase::AcsDispatch, &["dispatch", ".ACSView"]),
    (Phase::Login, &["login"]),
];

fn markers(protocol: Protocol) -> &'static [(Phase, &'static [&'static str])] {
    match protocol {
        Protocol::Oidc => OIDC_MARKERS,
        Protocol::Saml => SAML_MARKERS,
    }
}

/// Classify one line.  The error is a description of why the duration could not be read; the
/// caller attaches artifact name and line number.

pub fn classify_line(protocol: Protocol, line: &str) -> Result<LineClass, String> {
    if !line.contains(INFO_MARKER) {
        return Ok(LineClass::Ignore);
    }
    if line.contains(REDIRECT_MARKER) {
        return Ok(LineClass::NewUserRedirect(parse_duration(line)?));
    }
    for (phase, needles) in markers(protocol) {
        if needles.iter().all(|n| line.contains(n)) {
            return Ok(LineClass::PhaseSample(*phase, parse_duration(line)?));
        }
    }
    Ok(LineClass::Ignore)
}

/// The duration is the last whitespace-separated token on the line.

fn parse_duration(line: &str) -> Result<f64, String> {
    let token = match line.split_whitespace().last() {
        Some(t) => t,
        None => return Err("Empty line".to_string()),
    };
    match token.parse::<f64>() {
        Ok(d) if d.is_finite() && d >= 0.0 => Ok(d),
        Ok(d) => Err(format!("Duration out of range: {d}")),
        Err(_) => Err(format!("Duration is not a number: '{token}'")),
    }
}

#[test]
fn test_classify_oidc() {
    let p = Protocol::Oidc;
    assert!(
        classify_line(p, "2024-03-01 10:00:00,001 INFO oidc redirect 0.12")
            == Ok(LineClass::NewUserRedirect(0.12))
    );
    assert!(
        classify_line(p, "2024-03-01 10:00:00,101 INFO oidc get_access_token 0.05")
            == Ok(LineClass::PhaseSample(Phase::GetAccessToken, 0.05))
    );
    assert!(
        classify_line(p, "2024-03-01 10:00:00,111 INFO oidc _decode_id_token 0.02\n")
            == Ok(LineClass::PhaseSample(Phase::DecodeIdToken, 0.02))
    );
    assert!(
        classify_line(p, "INFO mozilla_django_oidc complete_login\t1.5")
            == Ok(LineClass::PhaseSample(Phase::CompleteLogin, 1.5))
    );
    assert!(
        classify_line(p, "INFO views dispatch 3e-2")
            == Ok(LineClass::PhaseSample(Phase::Dispatch, 0.03))
    );
    assert!(classify_line(p, "DEBUG oidc redirect 0.12") == Ok(LineClass::Ignore));
    assert!(classify_line(p, "INFO gunicorn booting worker 12") == Ok(LineClass::Ignore));
    assert!(classify_line(p, "").unwrap() == LineClass::Ignore);
}

#[test]
fn test_classify_saml() {
    let p = Protocol::Saml;
    assert!(
        classify_line(p, "INFO djangosaml2.views.FinishACSView dispatch 0.4")
            == Ok(LineClass::PhaseSample(Phase::FinishAcsDispatch, 0.4))
    );
    assert!(
        classify_line(p, "INFO djangosaml2.views.ACSView dispatch 0.3")
            == Ok(LineClass::PhaseSample(Phase::AcsDispatch, 0.3))
    );
    assert!(
        classify_line(p, "INFO djangosaml2 build_auth 0.01")
            == Ok(LineClass::PhaseSample(Phase::BuildAuth, 0.01))
    );
    assert!(
        classify_line(p, "INFO djangosaml2.views.LoginView login 0.2")
            == Ok(LineClass::PhaseSample(Phase::Login, 0.2))
    );
    // OIDC phase names mean nothing to the SAML classifier.
    assert!(classify_line(p, "INFO oidc get_access_token 0.05") == Ok(LineClass::Ignore));
}

#[test]
fn test_classify_bad_duration() {
    assert!(classify_line(Protocol::Oidc, "INFO oidc redirect n/a").is_err());
    assert!(classify_line(Protocol::Oidc, "INFO oidc dispatch -1.0").is_err());
    assert!(classify_line(Protocol::Oidc, "INFO oidc dispatch NaN").is_err());
    assert!(classify_line(Protocol::Saml, "INFO redirect").is_err());
}
