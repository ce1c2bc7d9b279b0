/// Print one row per (user, cycle) for a single measurement.  The measurement of a failed cycle is
/// absent, so every user has exactly one row per cycle ingested.
use crate::aggregate::{build_timing, build_user_time};
use crate::format;
use crate::{Source, TableCmdArgs};

use anyhow::{bail, Result};
use evalutils::TestConfiguration;
use evallog::{
    outcome_table, phase_table, user_time_table, Aggregate, Phase, TableRow, UserTimeAggregate,
    LOGIN_FINISH_TIME, LOGIN_START_TIME, PROTECTED_RESOURCE, TOTAL_LOGIN_TIME,
};
use std::collections::HashMap;
use std::io;

type Row = TableRow<String>;

/// The measurement key is the context, for the `key` field.

type Formatter = &'static dyn Fn(&Row, &str) -> Option<String>;

fn my_formatters() -> (HashMap<String, Formatter>, HashMap<String, Vec<String>>) {
    let mut formatters: HashMap<String, Formatter> = HashMap::new();
    let mut aliases: HashMap<String, Vec<String>> = HashMap::new();

    formatters.insert("user".to_string(), &format_user);
    formatters.insert("cycle".to_string(), &format_cycle);
    formatters.insert("key".to_string(), &format_key);
    formatters.insert("value".to_string(), &format_value);
    aliases.insert(
        "all".to_string(),
        vec![
            "user".to_string(),
            "cycle".to_string(),
            "key".to_string(),
            "value".to_string(),
        ],
    );

    (formatters, aliases)
}

const FMT_DEFAULTS: &str = "user,cycle,value";

fn format_user(d: &Row, _: &str) -> Option<String> {
    Some(format!("{}", d.user_id))
}

fn format_cycle(d: &Row, _: &str) -> Option<String> {
    Some(format!("{}", d.cycle_id))
}

fn format_key(_: &Row, key: &str) -> Option<String> {
    Some(key.to_string())
}

fn format_value(d: &Row, _: &str) -> Option<String> {
    d.measurement.clone()
}

pub fn fmt_help() -> format::Help {
    let (formatters, aliases) = my_formatters();
    format::Help {
        fields: formatters.keys().cloned().collect::<Vec<String>>(),
        aliases: aliases
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<(String, Vec<String>)>>(),
        defaults: FMT_DEFAULTS.to_string(),
    }
}

pub fn print_table(output: &mut dyn io::Write, source: &Source, args: &TableCmdArgs) -> Result<()> {
    let key = args.key.as_str();
    let rows = match key {
        PROTECTED_RESOURCE => outcome_table(&load_user_time(source, &args.input_args.aggregate)?)?,
        TOTAL_LOGIN_TIME | LOGIN_START_TIME | LOGIN_FINISH_TIME => {
            let agg = load_user_time(source, &args.input_args.aggregate)?;
            stringify(user_time_table(&agg, key)?)
        }
        _ => {
            if Phase::from_key(key).is_none() {
                bail!("Unknown key '{key}', expected a phase key or a user-time key");
            }
            let agg = load_timing(source, &args.input_args.aggregate)?;
            stringify(phase_table(&agg, key)?)
        }
    };

    let (formatters, aliases) = my_formatters();
    let spec = format::with_default_fields(
        args.print_args.fmt.as_deref().unwrap_or(FMT_DEFAULTS),
        FMT_DEFAULTS,
        &formatters,
        &aliases,
    );
    let (fields, others) = format::parse_fields(&spec, &formatters, &aliases)?;
    let opts = format::standard_options(&others);
    format::format_data(output, &fields, &formatters, &opts, &rows, key)
}

fn stringify(rows: Vec<TableRow<f64>>) -> Vec<Row> {
    rows.into_iter()
        .map(|r| TableRow {
            user_id: r.user_id,
            cycle_id: r.cycle_id,
            measurement: r.measurement.map(|v| v.to_string()),
        })
        .collect()
}

/// The timing aggregate, from the persisted file if one is named and otherwise from the
/// artifacts.  A persisted aggregate must be for the selected configuration.

pub fn load_timing(source: &Source, aggregate: &Option<String>) -> Result<Aggregate> {
    match aggregate {
        Some(filename) => {
            let agg = Aggregate::from_json(filename, &std::fs::read_to_string(filename)?)?;
            check_configuration(&source.config, &agg.configuration()?, filename)?;
            Ok(agg)
        }
        None => build_timing(source),
    }
}

pub fn load_user_time(source: &Source, aggregate: &Option<String>) -> Result<UserTimeAggregate> {
    match aggregate {
        Some(filename) => {
            let agg = UserTimeAggregate::from_json(filename, &std::fs::read_to_string(filename)?)?;
            let found = TestConfiguration::new(agg.protocol, agg.test_duration, agg.user_count)?;
            check_configuration(&source.config, &found, filename)?;
            Ok(agg)
        }
        None => build_user_time(source),
    }
}

fn check_configuration(
    wanted: &TestConfiguration,
    found: &TestConfiguration,
    filename: &str,
) -> Result<()> {
    if wanted != found {
        bail!("{filename} holds an aggregate for {found}, not {wanted}");
    }
    Ok(())
}

#[cfg(test)]
use crate::{AggregateInputArgs, MetaArgs, PrintArgs, SourceArgs};

#[cfg(test)]
fn table_args(key: &str, fmt: &str, aggregate: Option<String>) -> TableCmdArgs {
    TableCmdArgs {
        source_args: SourceArgs {
            protocol: evalutils::Protocol::Oidc,
            duration: 60,
            users: 2,
            data_path: None,
            config_file: None,
        },
        input_args: AggregateInputArgs { aggregate },
        key: key.to_string(),
        print_args: PrintArgs {
            fmt: Some(fmt.to_string()),
        },
        meta_args: MetaArgs::default(),
    }
}

#[cfg(test)]
fn oidc_source(d: &std::path::Path) -> Source {
    for name in ["oidc-eval-60-2-1.log", "oidc-eval-60-2-2.log"] {
        std::fs::copy(format!("../tests/evallog/{name}"), d.join(name)).unwrap();
    }
    Source {
        config: TestConfiguration::new(evalutils::Protocol::Oidc, 60, 2).unwrap(),
        eval_config: evalutils::EvalConfig::default(),
        data_path: d.to_path_buf(),
    }
}

#[test]
fn test_print_phase_table() {
    let tmp = tempfile::tempdir().unwrap();
    let source = oidc_source(tmp.path());
    let mut output = Vec::new();
    print_table(
        &mut output,
        &source,
        &table_args("dispatch_time", "csv,header", None),
    )
    .unwrap();
    let text = String::from_utf8(output).unwrap();
    // User 2 has no dispatch in the second cycle.
    assert!(text == "user,cycle,value\n1,1,1.204\n1,2,1.111\n2,1,1.262\n2,2,-\n");
}

#[test]
fn test_print_table_errors() {
    let tmp = tempfile::tempdir().unwrap();
    let source = oidc_source(tmp.path());
    let mut output = Vec::new();
    assert!(print_table(&mut output, &source, &table_args("no_such_time", "csv", None)).is_err());

    let other = tmp.path().join("other-aggregate.json");
    let mut agg = build_timing(&source).unwrap();
    agg.user_count = 3;
    std::fs::write(&other, agg.to_json().unwrap()).unwrap();
    let args = table_args("dispatch_time", "csv", Some(other.to_str().unwrap().to_string()));
    assert!(print_table(&mut output, &source, &args).is_err());
}
