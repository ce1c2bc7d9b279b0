/// Read evaluation settings from a json file.
///
/// File format:
///
/// An object { ... } with the following named fields and value types, all optional:
///
///   name - string, a name for the evaluation setup
///   description - string, arbitrary text describing the setup
///   data-path - string, the directory holding the artifacts
///   allowed-outcomes - array of strings, the `protected_resource` values that count as a finished
///      login.  Must not be empty when present.
///   sp-groups - array of strings, the control groups monitored at the service provider.  A
///      resource block whose group contains one of these strings is filed under that string.
///   sp-catchall - string, where all other service provider blocks are filed
///   idp-containers - array of strings, the container names monitored at the identity provider.
///      Container ids are resolved to these names through the header of each resource record.
///   idp-catchall - string, where all other identity provider blocks are filed
///
/// Any field name starting with '#' is reserved for arbitrary comments.  Other unknown fields are
/// ignored.
use anyhow::{bail, Result};
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path;

// See above comment block for field documentation.

#[derive(Debug, Clone, PartialEq)]
pub struct EvalConfig {
    pub name: String,
    pub description: String,
    pub data_path: Option<String>,
    pub allowed_outcomes: Vec<String>,
    pub sp_groups: Vec<String>,
    pub sp_catchall: String,
    pub idp_containers: Vec<String>,
    pub idp_catchall: String,
}

impl Default for EvalConfig {
    fn default() -> EvalConfig {
        EvalConfig {
            name: "".to_string(),
            description: "".to_string(),
            data_path: None,
            allowed_outcomes: vec!["True".to_string(), "False".to_string()],
            sp_groups: vec!["nginx".to_string(), "gunicorn".to_string()],
            sp_catchall: "eval.slice".to_string(),
            idp_containers: vec![
                "keycloak".to_string(),
                "postgres".to_string(),
                "caddy".to_string(),
            ],
            idp_catchall: "docker".to_string(),
        }
    }
}

/// The file is hand-written and its fields are all optional, so use the generic JSON parser
/// followed by explicit decoding of the fields, rather than a derived strongly-typed parser.

pub fn read_eval_config(filename: &str) -> Result<EvalConfig> {
    let file = File::open(path::Path::new(filename))?;
    let reader = BufReader::new(file);
    let v = serde_json::from_reader(reader)?;
    eval_config_from_value(v)
}

pub fn parse_eval_config(text: &str) -> Result<EvalConfig> {
    eval_config_from_value(serde_json::from_str(text)?)
}

fn eval_config_from_value(v: Value) -> Result<EvalConfig> {
    let fields = if let Value::Object(fields) = v {
        fields
    } else {
        bail!("Expected an object value")
    };
    let mut cfg: EvalConfig = Default::default();
    cfg.name = grab_string_opt(&fields, "name")?.unwrap_or_default();
    cfg.description = grab_string_opt(&fields, "description")?.unwrap_or_default();
    cfg.data_path = grab_string_opt(&fields, "data-path")?;
    if let Some(outcomes) = grab_strings_opt(&fields, "allowed-outcomes")? {
        if outcomes.is_empty() {
            bail!("Field 'allowed-outcomes' must not be empty");
        }
        cfg.allowed_outcomes = outcomes;
    }
    if let Some(groups) = grab_strings_opt(&fields, "sp-groups")? {
        cfg.sp_groups = groups;
    }
    if let Some(s) = grab_string_opt(&fields, "sp-catchall")? {
        cfg.sp_catchall = s;
    }
    if let Some(containers) = grab_strings_opt(&fields, "idp-containers")? {
        cfg.idp_containers = containers;
    }
    if let Some(s) = grab_string_opt(&fields, "idp-catchall")? {
        cfg.idp_catchall = s;
    }
    for name in cfg.sp_groups.iter().chain(cfg.idp_containers.iter()) {
        if name.is_empty() {
            bail!("Group and container names must not be empty");
        }
    }
    Ok(cfg)
}

fn grab_string_opt(fields: &serde_json::Map<String, Value>, name: &str) -> Result<Option<String>> {
    if let Some(val) = fields.get(name) {
        if let Value::String(s) = val {
            Ok(Some(s.to_string()))
        } else {
            bail!("Field '{name}' must have a string value");
        }
    } else {
        Ok(None)
    }
}

fn grab_strings_opt(
    fields: &serde_json::Map<String, Value>,
    name: &str,
) -> Result<Option<Vec<String>>> {
    match fields.get(name) {
        None => Ok(None),
        Some(Value::Array(vals)) => {
            let mut result = vec![];
            for v in vals {
                if let Value::String(s) = v {
                    result.push(s.to_string());
                } else {
                    bail!("Field '{name}' must have string values");
                }
            }
            Ok(Some(result))
        }
        Some(_) => bail!("Field '{name}' must be an array of strings"),
    }
}

#[test]
fn test_config() {
    let conf = read_eval_config("../tests/evalutils/whitebox-config.json").unwrap();
    assert!(conf.name == "uos-testbed");
    assert!(conf.data_path.as_deref() == Some("/srv/eval/logs"));
    assert!(conf.allowed_outcomes == vec!["Heads".to_string(), "Tails".to_string()]);
    assert!(conf.sp_groups == vec!["nginx".to_string(), "gunicorn".to_string(), "redis".to_string()]);
    assert!(conf.sp_catchall == "eval.slice");
    assert!(conf.idp_containers.len() == 3);
    assert!(conf.idp_catchall == "other");
}

#[test]
fn test_config_defaults() {
    let conf = parse_eval_config(r##"{"#comment": "nothing else"}"##).unwrap();
    assert!(conf == EvalConfig::default());
}

#[test]
fn test_config_errors() {
    assert!(parse_eval_config("[]").is_err());
    assert!(parse_eval_config(r#"{"allowed-outcomes": []}"#).is_err());
    assert!(parse_eval_config(r#"{"allowed-outcomes": "True"}"#).is_err());
    assert!(parse_eval_config(r#"{"sp-groups": [1, 2]}"#).is_err());
    assert!(parse_eval_config(r#"{"sp-groups": [""]}"#).is_err());
    assert!(parse_eval_config(r#"{"data-path": 7}"#).is_err());
}
