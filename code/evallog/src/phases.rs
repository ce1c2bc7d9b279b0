/// The measured phases of a login.  Each protocol has its own fixed set of five, and the set is
/// exactly the required key-set of a complete PhaseRecord for that protocol.
use evalutils::Protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Redirect,

    // OIDC
    GetAccessToken,
    DecodeIdToken,
    CompleteLogin,
    Dispatch,

    // SAML
    BuildAuth,
    Login,
    AcsDispatch,
    FinishAcsDispatch,
}

const OIDC_PHASES: [Phase; 5] = [
    Phase::Redirect,
    Phase::GetAccessToken,
    Phase::DecodeIdToken,
    Phase::CompleteLogin,
    Phase::Dispatch,
];

const SAML_PHASES: [Phase; 5] = [
    Phase::Redirect,
    Phase::BuildAuth,
    Phase::Login,
    Phase::AcsDispatch,
    Phase::FinishAcsDispatch,
];

const ALL_PHASES: [Phase; 9] = [
    Phase::Redirect,
    Phase::GetAccessToken,
    Phase::DecodeIdToken,
    Phase::CompleteLogin,
    Phase::Dispatch,
    Phase::BuildAuth,
    Phase::Login,
    Phase::AcsDispatch,
    Phase::FinishAcsDispatch,
];

impl Phase {
    /// The field name used in per-cycle records and in the aggregate.

    pub fn key(&self) -> &'static str {
        match self {
            Phase::Redirect => "redirect_time",
            Phase::GetAccessToken => "get_access_token_time",
            Phase::DecodeIdToken => "decode_id_token_time",
            Phase::CompleteLogin => "complete_login_time",
            Phase::Dispatch => "dispatch_time",
            Phase::BuildAuth => "build_auth_time",
            Phase::Login => "login_time",
            Phase::AcsDispatch => "acs_dispatch_time",
            Phase::FinishAcsDispatch => "finish_acs_dispatch_time",
        }
    }

    pub fn from_key(key: &str) -> Option<Phase> {
        ALL_PHASES.iter().find(|p| p.key() == key).copied()
    }
}

/// The phases of `protocol`, in the order of a login.

pub fn protocol_phases(protocol: Protocol) -> &'static [Phase] {
    match protocol {
        Protocol::Oidc => &OIDC_PHASES,
        Protocol::Saml => &SAML_PHASES,
    }
}

#[test]
fn test_phase_keys() {
    for p in ALL_PHASES {
        assert!(Phase::from_key(p.key()) == Some(p));
    }
    assert!(Phase::from_key("redirect").is_none());
    let oidc = protocol_phases(Protocol::Oidc)
        .iter()
        .map(|p| p.key())
        .collect::<Vec<&str>>();
    assert!(
        oidc == vec![
            "redirect_time",
            "get_access_token_time",
            "decode_id_token_time",
            "complete_login_time",
            "dispatch_time"
        ]
    );
    assert!(protocol_phases(Protocol::Saml)[4] == Phase::FinishAcsDispatch);
}
