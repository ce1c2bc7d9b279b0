/// Print summary statistics of the phase durations, or of the total login times, one row per user
/// and a final row for all users together.  Failed cycles are counted but contribute no values.
use crate::format;
use crate::table::{load_timing, load_user_time};
use crate::{Source, StatsCmdArgs};

use anyhow::Result;
use evallog::{phase_stats, user_time_stats, Summary};
use std::collections::HashMap;
use std::io;

type Formatter = &'static dyn Fn(&Summary, ()) -> Option<String>;

fn my_formatters() -> (HashMap<String, Formatter>, HashMap<String, Vec<String>>) {
    let mut formatters: HashMap<String, Formatter> = HashMap::new();
    let mut aliases: HashMap<String, Vec<String>> = HashMap::new();

    formatters.insert("user".to_string(), &format_user);
    formatters.insert("key".to_string(), &format_key);
    formatters.insert("count".to_string(), &format_count);
    formatters.insert("failed".to_string(), &format_failed);
    formatters.insert("mean".to_string(), &format_mean);
    formatters.insert("median".to_string(), &format_median);
    formatters.insert("min".to_string(), &format_min);
    formatters.insert("max".to_string(), &format_max);
    formatters.insert("stddev".to_string(), &format_stddev);
    aliases.insert(
        "spread".to_string(),
        vec!["min".to_string(), "max".to_string(), "stddev".to_string()],
    );

    (formatters, aliases)
}

fn format_user(d: &Summary, _: ()) -> Option<String> {
    Some(match d.user_id {
        Some(u) => format!("{u}"),
        None => "all".to_string(),
    })
}

fn format_key(d: &Summary, _: ()) -> Option<String> {
    Some(d.key.clone())
}

fn format_count(d: &Summary, _: ()) -> Option<String> {
    Some(format!("{}", d.count))
}

fn format_failed(d: &Summary, _: ()) -> Option<String> {
    Some(format!("{}", d.failed))
}

fn format_mean(d: &Summary, _: ()) -> Option<String> {
    fmt_seconds(d.mean)
}

fn format_median(d: &Summary, _: ()) -> Option<String> {
    fmt_seconds(d.median)
}

fn format_min(d: &Summary, _: ()) -> Option<String> {
    fmt_seconds(d.min)
}

fn format_max(d: &Summary, _: ()) -> Option<String> {
    fmt_seconds(d.max)
}

fn format_stddev(d: &Summary, _: ()) -> Option<String> {
    fmt_seconds(d.stddev)
}

fn fmt_seconds(v: Option<f64>) -> Option<String> {
    v.map(|v| format!("{v:.4}"))
}

const FMT_DEFAULTS: &str = "user,key,count,failed,mean,median,stddev";

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

pub fn print_stats(output: &mut dyn io::Write, source: &Source, args: &StatsCmdArgs) -> Result<()> {
    let summaries = if args.user_time {
        user_time_stats(&load_user_time(source, &args.input_args.aggregate)?)
    } else {
        phase_stats(&load_timing(source, &args.input_args.aggregate)?)
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
    format::format_data(output, &fields, &formatters, &opts, &summaries, ())
}

#[test]
fn test_print_stats() {
    use crate::{AggregateInputArgs, MetaArgs, PrintArgs, SourceArgs};

    let tmp = tempfile::tempdir().unwrap();
    for name in ["oidc-eval-60-2-1.log", "oidc-eval-60-2-2.log"] {
        std::fs::copy(format!("../tests/evallog/{name}"), tmp.path().join(name)).unwrap();
    }
    let source = Source {
        config: evalutils::TestConfiguration::new(evalutils::Protocol::Oidc, 60, 2).unwrap(),
        eval_config: evalutils::EvalConfig::default(),
        data_path: tmp.path().to_path_buf(),
    };
    let args = StatsCmdArgs {
        source_args: SourceArgs {
            protocol: evalutils::Protocol::Oidc,
            duration: 60,
            users: 2,
            data_path: None,
            config_file: None,
        },
        input_args: AggregateInputArgs { aggregate: None },
        user_time: false,
        print_args: PrintArgs {
            fmt: Some("user,key,count,failed,min,max,csv".to_string()),
        },
        meta_args: MetaArgs::default(),
    };
    let mut output = Vec::new();
    print_stats(&mut output, &source, &args).unwrap();
    let text = String::from_utf8(output).unwrap();
    let lines = text.lines().collect::<Vec<&str>>();
    // Five phases, each with two users and the all-users row.
    assert!(lines.len() == 15);
    assert!(lines[0] == "1,redirect_time,2,0,0.1210,0.1330");
    assert!(lines[1] == "2,redirect_time,1,1,0.1180,0.1180");
    assert!(lines[2] == "all,redirect_time,3,1,0.1180,0.1330");
}
