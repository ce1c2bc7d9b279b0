/// Print one resource metric of one monitored group, one row per sample, for every cycle of the
/// selected origin.
use crate::format;
use crate::{ResourceCmdArgs, Source};

use anyhow::{anyhow, Result};
use evalutils::format_nanos;
use evallog::{
    find_artifacts, resource_table, ArtifactClass, Method, MetricQuery, Resource,
    ResourceAccumulator, ResourceRow, Unit,
};
use std::collections::HashMap;
use std::io;

type Formatter = &'static dyn Fn(&ResourceRow, ()) -> Option<String>;

fn my_formatters() -> (HashMap<String, Formatter>, HashMap<String, Vec<String>>) {
    let mut formatters: HashMap<String, Formatter> = HashMap::new();
    let mut aliases: HashMap<String, Vec<String>> = HashMap::new();

    formatters.insert("cycle".to_string(), &format_cycle);
    formatters.insert("time".to_string(), &format_time);
    formatters.insert("timestamp".to_string(), &format_timestamp);
    formatters.insert("seconds".to_string(), &format_seconds);
    formatters.insert("value".to_string(), &format_value);
    aliases.insert(
        "all".to_string(),
        vec![
            "cycle".to_string(),
            "time".to_string(),
            "seconds".to_string(),
            "value".to_string(),
        ],
    );

    (formatters, aliases)
}

const FMT_DEFAULTS: &str = "cycle,seconds,value";

fn format_cycle(d: &ResourceRow, _: ()) -> Option<String> {
    Some(format!("{}", d.cycle_id))
}

fn format_time(d: &ResourceRow, _: ()) -> Option<String> {
    Some(format_nanos(d.timestamp_ns))
}

fn format_timestamp(d: &ResourceRow, _: ()) -> Option<String> {
    Some(format!("{}", d.timestamp_ns))
}

fn format_seconds(d: &ResourceRow, _: ()) -> Option<String> {
    Some(format!("{:.3}", d.seconds))
}

fn format_value(d: &ResourceRow, _: ()) -> Option<String> {
    Some(format!("{}", d.value))
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

fn metric_query(args: &ResourceCmdArgs) -> Result<MetricQuery> {
    Ok(MetricQuery {
        group: args.group.clone(),
        resource: args.resource.parse::<Resource>().map_err(|e| anyhow!(e))?,
        variable: args.variable.clone(),
        device: args.device.clone(),
        method: args.method.parse::<Method>().map_err(|e| anyhow!(e))?,
        unit: args.unit.parse::<Unit>().map_err(|e| anyhow!(e))?,
    })
}

pub fn print_resource(
    output: &mut dyn io::Write,
    source: &Source,
    args: &ResourceCmdArgs,
) -> Result<()> {
    let query = metric_query(args)?;
    let artifacts = find_artifacts(
        &source.data_path,
        &source.config,
        ArtifactClass::Resmon(args.origin),
    )?;
    let mut acc = ResourceAccumulator::new(source.config, args.origin, &source.eval_config);
    for a in &artifacts {
        acc.ingest(a)?;
    }
    let rows = resource_table(&acc.finalize(), &query)?;

    let (formatters, aliases) = my_formatters();
    let spec = format::with_default_fields(
        args.print_args.fmt.as_deref().unwrap_or(FMT_DEFAULTS),
        FMT_DEFAULTS,
        &formatters,
        &aliases,
    );
    let (fields, others) = format::parse_fields(&spec, &formatters, &aliases)?;
    let opts = format::standard_options(&others);
    format::format_data(output, &fields, &formatters, &opts, &rows, ())
}

#[cfg(test)]
fn resource_args(group: &str, resource: &str, variable: &str, unit: &str) -> ResourceCmdArgs {
    use crate::{MetaArgs, PrintArgs, SourceArgs};
    ResourceCmdArgs {
        source_args: SourceArgs {
            protocol: evalutils::Protocol::Oidc,
            duration: 60,
            users: 2,
            data_path: None,
            config_file: None,
        },
        origin: evalutils::Origin::Sp,
        group: group.to_string(),
        resource: resource.to_string(),
        variable: variable.to_string(),
        device: None,
        method: "raw".to_string(),
        unit: unit.to_string(),
        print_args: PrintArgs {
            fmt: Some("cycle,seconds,value,csv".to_string()),
        },
        meta_args: MetaArgs::default(),
    }
}

#[test]
fn test_print_resource() {
    let tmp = tempfile::tempdir().unwrap();
    let name = "oidc-eval-60-2-sp-resmon-1.txt";
    std::fs::copy(format!("../tests/evallog/{name}"), tmp.path().join(name)).unwrap();
    let source = Source {
        config: evalutils::TestConfiguration::new(evalutils::Protocol::Oidc, 60, 2).unwrap(),
        eval_config: evalutils::EvalConfig::default(),
        data_path: tmp.path().to_path_buf(),
    };

    let mut output = Vec::new();
    let args = resource_args("nginx", "memory", "anonymous_memory", "KB");
    print_resource(&mut output, &source, &args).unwrap();
    assert!(String::from_utf8(output).unwrap() == "1,0.000,4096\n1,1.000,4104\n");

    let mut output = Vec::new();
    let args = resource_args("redis", "memory", "anonymous_memory", "KB");
    assert!(print_resource(&mut output, &source, &args).is_err());
    let args = resource_args("nginx", "disk", "anonymous_memory", "KB");
    assert!(print_resource(&mut output, &source, &args).is_err());
    let args = resource_args("nginx", "cpu", "total_cpu_time", "MB");
    assert!(print_resource(&mut output, &source, &args).is_err());
}
